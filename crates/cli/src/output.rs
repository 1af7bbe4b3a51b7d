use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use orchestrator::{RunOutcome, RunReport};

pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write JSON report to {}", path.display()))
}

pub fn print_summary(report: &RunReport) {
    println!();
    println!("{} {}", "Target:".bold(), report.target);
    println!("{} {}", "Policy:".bold(), report.policy);
    println!("{} {}", "Run:".bold(), report.run_id);
    println!();

    for result in &report.history {
        let marker = if result.mentions_failure() {
            "✗".red()
        } else {
            "✓".green()
        };
        let count = result
            .number("count")
            .map(|c| format!(" ({c} found)"))
            .unwrap_or_default();
        println!("  {} {}{}", marker, result.phase, count);
    }

    println!();
    let duration = report.finished_at - report.started_at;
    let outcome = match &report.outcome {
        RunOutcome::Completed { reason } => format!("completed: {reason}").green(),
        RunOutcome::Cancelled => "cancelled".yellow(),
        RunOutcome::IterationLimit => "stopped at iteration limit".yellow(),
    };
    println!(
        "{} {} in {:.1}s",
        "Outcome:".bold(),
        outcome,
        duration.num_milliseconds() as f64 / 1000.0
    );
}
