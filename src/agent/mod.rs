//! The build agent: a build queue drained by one worker

pub mod filesystem;
pub mod queue;

pub use filesystem::AgentFilesystem;
pub use queue::BuildQueue;
