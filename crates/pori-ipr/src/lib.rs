// pori-ipr: variant annotation with GraphKB and report upload to IPR

pub mod annotate;
pub mod cli;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod inputs;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod summary;
pub mod therapeutic;
pub mod util;

pub use config::{IprConfig, Settings};
pub use connection::{IprConnection, UploadOptions};
pub use error::{IprError, Result};
pub use pipeline::{CreateReportOptions, ReportOptions, build_report, create_report, prepare_content};
