//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod init;
mod local;
mod runs;

pub use init::InitCommands;
pub use runs::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::Config;
use crate::types::parse_key_val;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Execute a definition on this machine
    Run {
        /// Path to the definition file
        file: PathBuf,

        /// Branch the run is for
        #[arg(short, long)]
        branch: String,

        /// Definition variable as KEY=value
        #[arg(long, value_parser = parse_key_val)]
        var: Vec<(String, String)>,

        /// Run parameter as KEY=value
        #[arg(short, long, value_parser = parse_key_val)]
        param: Vec<(String, String)>,
    },
    /// Check a definition without running it
    Validate {
        file: PathBuf,

        /// Definition variable as KEY=value
        #[arg(long, value_parser = parse_key_val)]
        var: Vec<(String, String)>,
    },
    /// Show which environment a branch deploys to
    Env {
        file: PathBuf,

        #[arg(short, long)]
        branch: String,
    },
    /// List the server's definitions
    Pipelines,
    /// Runs on the server
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Initialize development environment
    Init {
        #[command(subcommand)]
        command: InitCommands,
    },
}

/// Routes the command to its handler and returns the process exit code
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Run {
            file,
            branch,
            var,
            param,
        } => local::run_pipeline(&file, &branch, var, param).await,
        Commands::Validate { file, var } => local::validate_pipeline(&file, var),
        Commands::Env { file, branch } => local::show_environment(&file, &branch),
        Commands::Pipelines => runs::list_pipelines(config).await,
        Commands::Runs { command } => runs::handle_run_command(command, config).await,
        Commands::Init { command } => init::handle_init_command(command),
    }
}
