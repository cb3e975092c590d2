//! SQLite storage backend for the payroll engine.
//!
//! Amounts are kept as TEXT decimals, results are append-only (enforced by
//! triggers), and bracket tables or fiscal parameters referenced by a stored
//! result cannot be deleted.

pub mod decimal;
pub mod factory;
pub mod repository;

pub use factory::SqliteRepositoryFactory;
pub use repository::SqliteRepository;
