// pori-graphkb: GraphKB API client, vocabulary lookups and variant matching

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod genes;
pub mod matching;
pub mod mock;
pub mod statement;
pub mod util;
pub mod vocab;

pub use config::GraphKbConfig;
pub use connection::{GraphKb, GraphKbConnection, QueryOptions, from_rows, query_as, query_as_with};
pub use error::{GraphKbError, Result};
pub use matching::{FeatureOptions, ReferenceClass};
pub use vocab::TermTreeOptions;
