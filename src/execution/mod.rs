//! Pipeline execution

pub mod cancel;
pub mod events;
pub mod runner;

pub use cancel::CancellationFlag;
pub use events::{EventHandler, PipelineEvent};
pub use runner::PipelineRunner;
