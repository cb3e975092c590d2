//! Payroll tax calculation components.
//!
//! Leaves first: [`resolver`] and [`evaluator`] are stateless and shared by
//! both result families; [`production`], [`adjustments`], [`bonds`] and
//! [`fees`] build the production bases; [`management`] is the flat-rate
//! pipeline; [`writer`] assembles and persists snapshots; [`engine`] runs
//! physicians and sweeps.

pub mod adjustments;
pub mod bonds;
pub mod cancel;
pub mod common;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fees;
pub mod management;
pub mod production;
pub mod resolver;
pub mod writer;

pub use cancel::CancellationFlag;
pub use engine::{
    ComputeFailure, ComputeReport, ComputeRequest, EngineConfig, EngineConfigError, PayrollEngine,
};
pub use error::ComputationError;
pub use evaluator::{Evaluation, WithholdingEvaluation, evaluate, evaluate_withholding};
pub use resolver::{BracketTableSet, resolve};
