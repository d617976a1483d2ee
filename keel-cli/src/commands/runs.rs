//! Remote run command handlers

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use keel_client::KeelClient;
use keel_core::dto::run::TriggerRun;
use std::process::ExitCode;
use std::time::Duration;

use crate::config::Config;
use crate::display::{
    colorize_run_status, exit_code, print_log_entry, print_run_details, print_run_summary,
    print_steps,
};
use crate::id_resolver::resolve_run_id;
use crate::types::{IdOrPrefix, parse_key_val};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// List recent runs
    List {
        /// Only runs of this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Get run details
    Get {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Show step results of a run
    Steps {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Show the log of a run
    Logs {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Trigger a run of a server-side definition
    Trigger {
        /// Definition name on the server
        pipeline: String,

        #[arg(short, long)]
        branch: String,

        /// Run parameter as KEY=value
        #[arg(short, long, value_parser = parse_key_val)]
        param: Vec<(String, String)>,

        /// Wait for the run to finish and exit with its status
        #[arg(short, long)]
        wait: bool,
    },
    /// Abort an active run
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<ExitCode> {
    let client = KeelClient::new(&config.server_url);

    match command {
        RunCommands::List { pipeline, limit } => list_runs(&client, pipeline.as_deref(), limit).await,
        RunCommands::Get { id } => get_run(&client, &id).await,
        RunCommands::Steps { id } => get_steps(&client, &id).await,
        RunCommands::Logs { id } => get_logs(&client, &id).await,
        RunCommands::Trigger {
            pipeline,
            branch,
            param,
            wait,
        } => trigger_run(&client, pipeline, branch, param, wait).await,
        RunCommands::Cancel { id } => cancel_run(&client, &id).await,
    }
}

/// List the server's definitions
pub async fn list_pipelines(config: &Config) -> Result<ExitCode> {
    let client = KeelClient::new(&config.server_url);
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", format!("Found {} pipeline(s):", pipelines.len()).bold());
    println!();
    for pipeline in pipelines {
        match &pipeline.error {
            None => {
                println!("  {} {}", "✓".green(), pipeline.name.bold());
                if let Some(description) = &pipeline.description {
                    println!("    {}", description.dimmed());
                }
                println!("    Steps: {}", pipeline.steps.join(" → "));
            }
            Some(error) => {
                println!("  {} {}", "✗".red(), pipeline.name.bold());
                println!("    {}", error.red());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn list_runs(client: &KeelClient, pipeline: Option<&str>, limit: u32) -> Result<ExitCode> {
    let runs = client.list_runs(pipeline, Some(limit)).await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in &runs {
            print_run_summary(run);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn get_run(client: &KeelClient, id: &str) -> Result<ExitCode> {
    let id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client.get_run(id).await?;

    print_run_details(&run);

    Ok(ExitCode::SUCCESS)
}

async fn get_steps(client: &KeelClient, id: &str) -> Result<ExitCode> {
    let id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let steps = client.get_run_steps(id).await?;

    if steps.steps.is_empty() {
        println!("{}", "No steps recorded yet.".yellow());
    } else {
        print_steps(&steps.steps, &steps.rollback);
    }

    Ok(ExitCode::SUCCESS)
}

async fn get_logs(client: &KeelClient, id: &str) -> Result<ExitCode> {
    let id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let logs = client.get_run_logs(id).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this run.".yellow());
    } else {
        println!("{}", format!("Logs for run {}:", id).bold());
        println!("{}", "─".repeat(80).dimmed());
        for log in &logs {
            print_log_entry(log);
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(ExitCode::SUCCESS)
}

async fn trigger_run(
    client: &KeelClient,
    pipeline: String,
    branch: String,
    params: Vec<(String, String)>,
    wait: bool,
) -> Result<ExitCode> {
    let run = client
        .trigger_run(TriggerRun {
            pipeline,
            branch,
            parameters: params.into_iter().collect(),
        })
        .await?;

    println!(
        "{} {} #{} on {} → {}",
        "✓ Triggered".green().bold(),
        run.pipeline.bold(),
        run.number,
        run.branch,
        run.environment.cyan()
    );
    println!("  ID: {}", run.id.to_string().cyan());

    if !wait {
        return Ok(ExitCode::SUCCESS);
    }

    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let current = client
            .get_run(run.id)
            .await
            .context("Failed to poll run status")?;
        if current.status.is_terminal() {
            println!();
            print_run_details(&current);
            return Ok(exit_code(current.status));
        }
    }
}

async fn cancel_run(client: &KeelClient, id: &str) -> Result<ExitCode> {
    let id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;

    match client.cancel_run(id).await {
        Ok(run) => {
            println!(
                "{} {} #{} (was {})",
                "✓ Cancellation requested for".green(),
                run.pipeline.bold(),
                run.number,
                colorize_run_status(run.status)
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_conflict() => {
            println!("{}", format!("Run {} is not active.", id).yellow());
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
