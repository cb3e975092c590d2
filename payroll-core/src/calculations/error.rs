use chrono::NaiveDate;
use thiserror::Error;

use crate::db::repository::RepositoryError;
use crate::models::{BracketSetError, ContributorKind};

/// Fatal failures of a single physician's computation.
///
/// Recoverable conditions (negative bases, ceiling clamps, skipped lines)
/// are not errors; they become annotations on the result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComputationError {
    #[error("no {} bracket table covers {date}", kind.as_str())]
    MissingTaxTable { kind: ContributorKind, date: NaiveDate },

    #[error("{} bracket tables {ids:?} all match {date}", kind.as_str())]
    AmbiguousTaxTable {
        kind: ContributorKind,
        date: NaiveDate,
        ids: Vec<i64>,
    },

    #[error("bracket table {table_id} is invalid: {source}")]
    InvalidBracketSet {
        table_id: i64,
        #[source]
        source: BracketSetError,
    },

    #[error("physician {0} not found")]
    PhysicianNotFound(i64),

    #[error("computation cancelled before the result was written")]
    Cancelled,

    /// The physician's task ended without reporting back (panicked or was aborted).
    #[error("computation task ended without a result")]
    Aborted,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
