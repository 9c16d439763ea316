//! Core domain models
//!
//! Stages, step contracts, result records, project configuration and the
//! per-build workspace and log.

pub mod config;
pub mod log;
pub mod results;
pub mod stage;
pub mod state;
pub mod step;
pub mod workspace;

pub use config::*;
pub use log::*;
pub use results::*;
pub use stage::*;
pub use state::*;
pub use step::*;
pub use workspace::*;
