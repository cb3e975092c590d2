//! Command-line front end for the payroll engine: configuration, logging,
//! and the `compute` and `history` commands.

pub mod commands;
pub mod config;
pub mod logging;
