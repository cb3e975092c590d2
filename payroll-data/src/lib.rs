//! CSV intake and loaders for bracket tables and source entities.

pub mod intake;
pub mod loader;

pub use intake::IntakeError;
pub use loader::{
    BracketLoadSummary, BracketTableLoader, LoaderError, SourceKind, SourceLoader, parse_rows,
};
