//! Build logs handed to steps
//!
//! Every build owns a [`BuildLog`]. Steps receive a [`StepLogger`] bound to
//! their stage and config name; lines they write are kept with the build (so
//! they can be queried after it finishes) and forwarded to `tracing`.

use crate::core::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One captured log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub stage: Option<StageKind>,
    pub step: Option<String>,
    pub message: String,
}

/// Shared, append-only log of a single build
#[derive(Debug, Clone, Default)]
pub struct BuildLog {
    build_id: u64,
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl BuildLog {
    pub fn new(build_id: u64) -> Self {
        Self {
            build_id,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn build_id(&self) -> u64 {
        self.build_id
    }

    /// Logger for one step of one stage
    pub fn for_step(&self, stage: StageKind, step: &str) -> StepLogger {
        StepLogger {
            log: self.clone(),
            stage,
            step: step.to_string(),
        }
    }

    /// Record a build-level line
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(build_id = self.build_id, "{}", message);
        self.push(LogLevel::Info, None, None, message);
    }

    /// Snapshot of every line written so far
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn push(&self, level: LogLevel, stage: Option<StageKind>, step: Option<&str>, message: String) {
        let line = LogLine {
            timestamp: Utc::now(),
            level,
            stage,
            step: step.map(str::to_string),
            message,
        };
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }
}

/// Logger passed to a step at initialization
#[derive(Debug, Clone)]
pub struct StepLogger {
    log: BuildLog,
    stage: StageKind,
    step: String,
}

impl StepLogger {
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(build_id = self.log.build_id, stage = %self.stage, step = %self.step, "{}", message);
        self.log
            .push(LogLevel::Info, Some(self.stage), Some(&self.step), message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(build_id = self.log.build_id, stage = %self.stage, step = %self.step, "{}", message);
        self.log
            .push(LogLevel::Warn, Some(self.stage), Some(&self.step), message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(build_id = self.log.build_id, stage = %self.stage, step = %self.step, "{}", message);
        self.log
            .push(LogLevel::Error, Some(self.stage), Some(&self.step), message);
    }
}
