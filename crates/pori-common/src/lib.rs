//! PORI Common - shared data model
//!
//! This crate provides the types passed between the GraphKB and IPR crates:
//! - GraphKB records, links, positions and statements
//! - IPR variant rows and kbMatches rows
//! - Lenient deserializers for spreadsheet-derived input

pub mod kb_match;
pub mod lenient;
pub mod record;
pub mod variant;

// Re-exports for convenience
pub use kb_match::{ImageDefinition, IprGene, KbData, KbMatch};
pub use record::{
    Link, ParsedVariant, Position, Record, Statement, convert_to_rid_list, is_rid,
};
pub use variant::{
    CopyVariant, ExpressionVariant, FusionVariant, IprVariant, SignatureVariant, SmallMutation,
    variant_type,
};
