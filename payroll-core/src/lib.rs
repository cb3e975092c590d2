pub mod calculations;
pub mod db;
pub mod models;

pub use calculations::{
    CancellationFlag, ComputationError, ComputeFailure, ComputeReport, ComputeRequest,
    EngineConfig, EngineConfigError, PayrollEngine,
};
pub use db::repository::{PayrollRepository, RepositoryError};
pub use models::*;
