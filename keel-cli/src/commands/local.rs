//! Local command handlers
//!
//! `run`, `validate` and `env` work on a definition file with the engine
//! linked into this process; no server is involved.

use anyhow::{Context, Result};
use colored::*;
use keel_core::KeelError;
use keel_core::domain::PipelineDefinition;
use keel_engine::environment::EnvironmentResolver;
use keel_engine::{Engine, EngineConfig, Trigger, cancellation};
use keel_lua::load_definition_file;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use crate::display::{colorize_run_status, exit_code, print_run_details};

fn engine_config(vars: Vec<(String, String)>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    config.vars.extend(vars);
    config
}

fn load(file: &Path, config: &EngineConfig) -> Result<PipelineDefinition> {
    load_definition_file(file, &config.loader_config())
        .with_context(|| format!("Failed to load {}", file.display()))
}

/// Execute a definition; Ctrl-C aborts the run
pub async fn run_pipeline(
    file: &Path,
    branch: &str,
    vars: Vec<(String, String)>,
    params: Vec<(String, String)>,
) -> Result<ExitCode> {
    let config = engine_config(vars);
    let definition = Arc::new(load(file, &config)?);
    let engine = Engine::from_config(config).await?;

    let trigger = Trigger {
        branch: branch.to_string(),
        parameters: params.into_iter().collect(),
    };
    let prepared = engine.prepare(definition, trigger).await?;

    println!(
        "{} {} #{} on {} → {}",
        "▶".cyan(),
        prepared.run.pipeline.bold(),
        prepared.run.number,
        prepared.run.branch,
        prepared.run.environment.cyan()
    );
    if let Some(tag) = prepared.image_tag() {
        println!("  Image: {}", tag.dimmed());
    }
    println!();

    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling run...".yellow());
            handle.cancel();
        }
    });

    let run = engine.execute(prepared, signal).await;

    println!();
    print_run_details(&run);
    println!();
    println!("Run finished {}", colorize_run_status(run.status).bold());

    Ok(exit_code(run.status))
}

/// Load and validate a definition, listing every problem found
pub fn validate_pipeline(file: &Path, vars: Vec<(String, String)>) -> Result<ExitCode> {
    let config = engine_config(vars);

    let definition = match load_definition_file(file, &config.loader_config()) {
        Ok(definition) => definition,
        Err(KeelError::MalformedDefinition(message)) => {
            println!("{} {}", "✗".red(), file.display().to_string().bold());
            for issue in message.split("; ") {
                println!("  {}", issue.red());
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(other) => return Err(other.into()),
    };

    println!(
        "{} {} ({})",
        "✓".green(),
        definition.name.bold(),
        file.display().to_string().dimmed()
    );
    if let Some(description) = &definition.description {
        println!("  {}", description);
    }
    println!("  Steps:        {}", definition.steps.len());
    if !definition.rollback.is_empty() {
        println!("  Rollback:     {}", definition.rollback.len());
    }
    println!("  Environments: {}", definition.environments.bindings().count());
    if !definition.credentials.is_empty() {
        let names: Vec<&str> = definition.credentials.iter().map(|c| c.name.as_str()).collect();
        println!("  Credentials:  {}", names.join(", "));
    }

    Ok(ExitCode::SUCCESS)
}

/// Resolve the environment binding for a branch
pub fn show_environment(file: &Path, branch: &str) -> Result<ExitCode> {
    let config = engine_config(Vec::new());
    let definition = load(file, &config)?;

    match EnvironmentResolver::new(&definition.environments).resolve(branch) {
        Ok(binding) => {
            println!("{} → {}", branch.bold(), binding.name.cyan().bold());
            println!("  Pattern:   {}", binding.pattern);
            println!("  Namespace: {}", binding.namespace);
            println!("  Manifest:  {}", binding.manifest);
            if let Some(tag) = &binding.image_tag {
                println!("  Image tag: {}", tag);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e.to_string().red());
            Ok(ExitCode::FAILURE)
        }
    }
}
