//! CLI output formatting

use crate::core::{BuildStatus, LogLevel, LogLine, PipelineResults, StageKind};
use crate::execution::PipelineEvent;
use crate::modules::ModuleInfo;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Spinner shown while a build runs
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a build status for display
pub fn format_status(status: BuildStatus) -> String {
    match status {
        BuildStatus::Queued => style("QUEUED").dim().to_string(),
        BuildStatus::Complete => style("COMPLETE").green().to_string(),
        BuildStatus::Failed => style("FAILED").red().to_string(),
        BuildStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn stage_label(stage: StageKind) -> String {
    format!("{:<10}", stage.as_str())
}

/// Format a pipeline event for display
pub fn format_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::PipelineStarted { build_id, target } => format!(
            "{} Building {} (build #{})",
            ROCKET,
            style(target).bold(),
            style(build_id).dim()
        ),
        PipelineEvent::StageStarted { stage, steps, .. } => format!(
            "{} {} {} step(s)",
            SPINNER,
            style(stage_label(*stage)).cyan(),
            steps
        ),
        PipelineEvent::StageSkipped { stage, reason, .. } => match reason {
            Some(reason) => format!(
                "{} {} skipped: {}",
                SKIP,
                style(stage_label(*stage)).dim(),
                style(reason).dim()
            ),
            None => format!("{} {} nothing to do", SKIP, style(stage_label(*stage)).dim()),
        },
        PipelineEvent::StepStarted { stage, step, .. } => {
            format!("   {} {}", style(stage_label(*stage)).dim(), style(step).cyan())
        }
        PipelineEvent::StepFinished {
            stage,
            step,
            success,
            error,
            ..
        } => {
            if *success {
                format!("   {} {}{}", style(stage_label(*stage)).dim(), CHECK, style(step).green())
            } else {
                format!(
                    "   {} {}{}: {}",
                    style(stage_label(*stage)).dim(),
                    CROSS,
                    style(step).red(),
                    style(error.as_deref().unwrap_or("failed")).dim()
                )
            }
        }
        PipelineEvent::StageFinished {
            stage,
            success,
            duration,
            ..
        } => {
            let icon = if *success { CHECK } else { CROSS };
            format!(
                "{} {} finished in {}",
                icon,
                style(stage_label(*stage)).bold(),
                style(format_duration(*duration)).dim()
            )
        }
        PipelineEvent::PipelineFinished {
            target,
            success,
            cancelled,
            ..
        } => {
            let outcome = if *cancelled {
                style("cancelled").yellow().to_string()
            } else if *success {
                format!("{} completed", style("successfully").green())
            } else {
                style("failed").red().to_string()
            };
            format!("{} Target {} {}", INFO, style(target).bold(), outcome)
        }
    }
}

/// One line per stage of a finished target
pub fn format_stage_table(results: &PipelineResults) -> Vec<String> {
    results
        .stage_summaries()
        .iter()
        .map(|(stage, success, skipped, duration)| {
            let state = match (success, skipped) {
                (true, true) => style("skipped").dim().to_string(),
                (true, false) => style("ok").green().to_string(),
                (false, true) => style("skipped (failed)").yellow().to_string(),
                (false, false) => style("failed").red().to_string(),
            };
            format!(
                "  {} {:<24} {}",
                stage_label(*stage),
                state,
                style(format_duration(*duration)).dim()
            )
        })
        .collect()
}

pub fn format_module(info: &ModuleInfo) -> String {
    format!(
        "  {} {:<16} {}",
        style(stage_label(info.stage)).cyan(),
        style(&info.config_name).bold(),
        style(&info.name).dim()
    )
}

pub fn format_log_line(line: &LogLine) -> String {
    let location = match (&line.stage, &line.step) {
        (Some(stage), Some(step)) => format!("[{}/{}] ", stage, step),
        _ => String::new(),
    };
    let message = match line.level {
        LogLevel::Info => line.message.clone(),
        LogLevel::Warn => style(&line.message).yellow().to_string(),
        LogLevel::Error => style(&line.message).red().to_string(),
    };
    format!(
        "{} {}{}",
        style(line.timestamp.format("%H:%M:%S")).dim(),
        style(location).dim(),
        message
    )
}
