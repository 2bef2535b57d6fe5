//! CLI output formatting

use crate::{
    core::{Pipeline, PipelineStatus, StepStatus, Termination},
    execution::{ExecutionEvent, PipelineResult},
};
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
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar counting finished steps
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        StepStatus::Pending => style(label).dim().to_string(),
        StepStatus::Running => style(label).yellow().to_string(),
        StepStatus::Succeeded => style(label).green().to_string(),
        StepStatus::Skipped => style(label).dim().to_string(),
        StepStatus::Failed => style(label).red().to_string(),
        StepStatus::TimedOut => style(label).red().to_string(),
        StepStatus::Cancelled => style(label).yellow().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting pipeline {} ({}, {} steps)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&execution_id.to_string()[..8]).dim(),
            total_steps
        ),
        ExecutionEvent::StepStarted { step_id } => {
            format!("{} {}", SPINNER, style(step_id).cyan())
        }
        ExecutionEvent::StepSkipped { step_id, reason } => {
            format!("{} {} ({})", SKIP, style(step_id).dim(), style(reason).dim())
        }
        ExecutionEvent::StepFinished {
            step_id,
            status,
            error,
            duration,
        } => {
            let took = duration
                .map(|d| format!(" in {}", format_duration(d)))
                .unwrap_or_default();
            match (status, error) {
                (StepStatus::Succeeded, _) => {
                    format!("{} {}{}", CHECK, style(step_id).green(), style(took).dim())
                }
                (_, Some(error)) => format!(
                    "{} {} {}: {}",
                    CROSS,
                    style(step_id).red(),
                    format_step_status(*status),
                    style(error).dim()
                ),
                (_, None) => format!("{} {} {}", CROSS, style(step_id).red(), format_step_status(*status)),
            }
        }
        ExecutionEvent::PipelineTimedOut { timeout } => format!(
            "{} Pipeline timed out after {}",
            WARN,
            format_duration(*timeout)
        ),
        ExecutionEvent::PipelineCancelled => format!("{} Pipeline cancelled", WARN),
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
            exit_code,
        } => {
            let status_str = match status {
                PipelineStatus::Succeeded => format!("{} completed", style("successfully").green()),
                PipelineStatus::Failed => format!("{} (exit code {})", style("failed").red(), exit_code),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// Per-step table and verdict printed after a run
pub fn format_summary(result: &PipelineResult) -> String {
    let mut lines = Vec::new();
    let width = result.steps.iter().map(|s| s.step_id.len()).max().unwrap_or(0);

    for step in &result.steps {
        let took = step
            .duration()
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "  {:width$}  {:<10}  {}",
            step.step_id,
            format_step_status(step.status),
            style(took).dim(),
            width = width
        );
        if let Some(error) = &step.error {
            line.push_str(&format!("  {}", style(error).dim()));
        }
        lines.push(line);
    }

    for image in &result.images {
        match &image.produced_by {
            Some(step) => lines.push(format!("  {} {} (from {})", CHECK, image.image, style(step).cyan())),
            None => lines.push(format!("  {} {} (not produced)", WARN, image.image)),
        }
    }

    let verdict = match (result.status, result.termination) {
        (PipelineStatus::Succeeded, _) => format!(
            "{} {} completed {}",
            CHECK,
            style(&result.pipeline_name).bold(),
            style("successfully").green()
        ),
        (PipelineStatus::Failed, Termination::TimedOut) => format!(
            "{} {} {}",
            CROSS,
            style(&result.pipeline_name).bold(),
            style("timed out").red()
        ),
        (PipelineStatus::Failed, Termination::Cancelled) => format!(
            "{} {} {}",
            CROSS,
            style(&result.pipeline_name).bold(),
            style("cancelled").yellow()
        ),
        (PipelineStatus::Failed, Termination::Completed) => format!(
            "{} {} {}",
            CROSS,
            style(&result.pipeline_name).bold(),
            style("failed").red()
        ),
    };
    lines.push(String::new());
    lines.push(format!(
        "{} in {} ({} succeeded, {} skipped, {} failed)",
        verdict,
        format_duration(result.duration()),
        result.counts.succeeded,
        result.counts.skipped,
        result.counts.failed + result.counts.timed_out + result.counts.cancelled
    ));
    lines.join("\n")
}

/// Execution order with each step's dependencies
pub fn format_graph(pipeline: &Pipeline) -> String {
    let graph = &pipeline.graph;
    let mut lines = vec![format!("{} {}", INFO, style(&pipeline.name).bold())];

    for (position, index) in graph.execution_order().iter().enumerate() {
        let step = graph.step(*index);
        let deps: Vec<&str> = graph
            .dependencies(*index)
            .iter()
            .map(|d| graph.step(*d).id.as_str())
            .collect();
        let mut line = format!("  {:>2}. {}", position + 1, style(&step.id).cyan());
        if !deps.is_empty() {
            line.push_str(&format!(" <- {}", deps.join(", ")));
        }
        if let Some(condition) = &step.condition {
            line.push_str(&format!(" {}", style(format!("[if {}]", condition.describe())).dim()));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            truncated
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
