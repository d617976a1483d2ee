//! Terminal output shared by local and remote commands

use colored::*;
use keel_core::domain::{LogEntry, LogLevel, PipelineRun, RunStatus, StepResult, StepStatus};
use keel_core::dto::run::RunSummary;
use keel_engine::format_duration;
use std::process::ExitCode;

/// 0 succeeded, 2 unstable, 1 failed or aborted
pub fn exit_code(status: RunStatus) -> ExitCode {
    ExitCode::from(exit_status(status))
}

fn exit_status(status: RunStatus) -> u8 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::Unstable => 2,
        _ => 1,
    }
}

pub fn colorize_run_status(status: RunStatus) -> ColoredString {
    let label = status.as_str().to_uppercase();
    match status {
        RunStatus::Pending => label.dimmed(),
        RunStatus::Running => label.cyan(),
        RunStatus::Succeeded => label.green(),
        RunStatus::Unstable => label.yellow(),
        RunStatus::Failed => label.red(),
        RunStatus::Aborted => label.red().dimmed(),
    }
}

fn colorize_step_status(status: StepStatus) -> ColoredString {
    let label = status.as_str().to_string();
    match status {
        StepStatus::Succeeded => label.green(),
        StepStatus::SucceededWithWarning => label.yellow(),
        StepStatus::Failed | StepStatus::Aborted => label.red(),
        StepStatus::Running | StepStatus::Retrying => label.cyan(),
        StepStatus::Pending | StepStatus::Skipped => label.dimmed(),
    }
}

/// One line per run, for listings
pub fn print_run_summary(run: &RunSummary) {
    println!(
        "  {} {} #{} {} {} → {}",
        "▸".cyan(),
        run.id.to_string().dimmed(),
        run.number,
        run.pipeline.bold(),
        run.branch,
        run.environment
    );
    print!(
        "    {}  {}",
        colorize_run_status(run.status),
        run.started_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
    );
    match &run.failed_step {
        Some(step) => println!("  failed at {}", step.red()),
        None => println!(),
    }
}

pub fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:          {}", run.id.to_string().cyan());
    println!("  Pipeline:    {} #{}", run.pipeline, run.number);
    println!("  Branch:      {}", run.branch);
    println!("  Environment: {}", run.environment);
    println!("  Status:      {}", colorize_run_status(run.status));
    println!("  Started:     {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = run.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(ms) = run.duration_ms() {
        println!("  Duration:    {}", format_duration(ms.max(0) as u64));
    }

    if !run.parameters.is_empty() {
        println!("\n{}", "Parameters:".bold());
        for (key, value) in &run.parameters {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if let Some(failure) = &run.failure {
        println!("\n{}", "Failure:".bold());
        println!("  Step:  {}", failure.step);
        println!("  Kind:  {}", failure.kind.as_str());
        println!("  Error: {}", failure.message.red());
    }

    if !run.steps.is_empty() {
        println!();
        print_steps(&run.steps, &run.rollback);
    }
}

pub fn print_steps(steps: &[StepResult], rollback: &[StepResult]) {
    println!("{}", "Steps:".bold());
    print_step_lines(steps);
    if !rollback.is_empty() {
        println!("{}", "Rollback:".bold());
        print_step_lines(rollback);
    }
}

fn print_step_lines(steps: &[StepResult]) {
    let width = steps.iter().map(|s| s.step.len()).max().unwrap_or(0);
    for step in steps {
        let mut line = format!(
            "  {:<width$}  {:<24}",
            step.step,
            colorize_step_status(step.status).to_string(),
            width = width
        );
        if step.status != StepStatus::Skipped {
            line.push_str(&format!(" {:>7}", format_duration(step.duration_ms)));
        }
        if step.attempts > 1 {
            line.push_str(&format!("  ({} attempts)", step.attempts));
        }
        println!("{}", line);
        if let Some(error) = &step.error {
            println!("  {:<width$}  {}", "", error.message.red(), width = width);
        }
    }
}

pub fn print_log_entry(log: &LogEntry) {
    let level = log.level.as_str().to_uppercase();
    let level = match log.level {
        LogLevel::Debug => level.dimmed(),
        LogLevel::Info => level.cyan(),
        LogLevel::Warning => level.yellow(),
        LogLevel::Error => level.red(),
    };

    let step = log
        .step
        .as_deref()
        .map(|s| format!("[{}] ", s))
        .unwrap_or_default();

    println!(
        "{} {:<7} {}{}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level,
        step.bold(),
        log.message
    );
}
