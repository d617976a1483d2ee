//! Init command handlers
//!
//! Generates editor support for definitions (.luarc.json and module stubs)
//! and an example pipeline to start from.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use keel_lua::{KeelModule, stub_registry};
use std::fs;
use std::path::Path;
use std::process::ExitCode;

/// Init subcommands
#[derive(Subcommand)]
pub enum InitCommands {
    /// Generate Lua development files (.luarc.json, stubs, example pipeline)
    Lua {
        /// Output directory for generated files
        #[arg(short, long, default_value = ".")]
        output: String,

        /// Generate only .luarc.json
        #[arg(long)]
        config_only: bool,

        /// Generate only stub files
        #[arg(long)]
        stubs_only: bool,
    },
}

pub fn handle_init_command(command: InitCommands) -> Result<ExitCode> {
    match command {
        InitCommands::Lua {
            output,
            config_only,
            stubs_only,
        } => {
            generate_lua_dev_files(Path::new(&output), config_only, stubs_only)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn generate_lua_dev_files(output_path: &Path, config_only: bool, stubs_only: bool) -> Result<()> {
    if !stubs_only {
        generate_luarc_json(output_path)?;
    }

    if !config_only {
        generate_stub_files(output_path)?;
    }

    if !config_only && !stubs_only {
        generate_example_pipeline(output_path)?;
    }

    println!("{}", "✓ Lua development files generated!".green().bold());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Install Lua Language Server in your editor");
    println!("  2. Edit {} to match your project", "pipelines/example.lua".cyan());
    println!(
        "  3. Check it with {}",
        "keel validate pipelines/example.lua".cyan()
    );

    Ok(())
}

/// Editor configuration naming every global the definition modules define
fn luarc(globals: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
        "runtime": { "version": "Lua 5.4" },
        "diagnostics": { "globals": globals },
        "workspace": {
            "library": [".keel/stubs"],
            "checkThirdParty": false
        },
        "completion": { "callSnippet": "Both" }
    })
}

fn generate_luarc_json(output_path: &Path) -> Result<()> {
    let luarc_path = output_path.join(".luarc.json");
    let content = serde_json::to_string_pretty(&luarc(&stub_registry().globals()))?;

    fs::write(&luarc_path, content)
        .with_context(|| format!("Failed to write .luarc.json to {:?}", luarc_path))?;

    println!("  {} .luarc.json", "Created".green());

    Ok(())
}

/// One stub file per module, generated from the modules themselves
fn generate_stub_files(output_path: &Path) -> Result<()> {
    let stubs_dir = output_path.join(".keel").join("stubs");
    fs::create_dir_all(&stubs_dir)
        .with_context(|| format!("Failed to create stubs directory at {:?}", stubs_dir))?;

    for module in stub_registry().modules() {
        let stub_path = stubs_dir.join(format!("{}.lua", module.id()));

        fs::write(&stub_path, module.stubs())
            .with_context(|| format!("Failed to write stub file {:?}", stub_path))?;

        println!(
            "  {} {}.lua  {}",
            "Created".green(),
            module.id(),
            module.description().dimmed()
        );
    }

    println!(
        "  {} in {}",
        "Stubs ready".green(),
        stubs_dir.display().to_string().cyan()
    );

    Ok(())
}

pub(crate) const EXAMPLE_PIPELINE: &str = r#"-- Build, scan and deploy through GitOps.
-- Branches pick their target environment; anything unmatched goes to stage.
return pipeline.define {
    name = "example",
    description = "Build, scan and deploy through GitOps",

    credentials = { "docker-hub", "nexus", "gitops", "argocd", "kube" },

    environments = {
        pipeline.environment("main", {
            name = "prod",
            namespace = "prod",
            manifest = "k8s/deployment-prod.yaml",
            image_tag = "docker.io/acme/example:${run.number}",
        }),
        pipeline.environment("develop", {
            name = "dev",
            namespace = "dev",
            manifest = "k8s/deployment-dev.yaml",
            image_tag = "docker.io/acme/example:dev-${run.number}",
        }),
    },
    fallback = {
        name = "stage",
        namespace = "stage",
        manifest = "k8s/deployment-stage.yaml",
        image_tag = "docker.io/acme/example:stage-${run.number}",
    },

    notify = {
        pipeline.mail("ops@example.com", { on = { "failed", "unstable" } }),
    },

    steps = {
        pipeline.step { name = "Build", uses = "build", with = { project = "." } },
        pipeline.step {
            name = "Image", uses = "image.build",
            with = { context = ".", tag = "${env.image_tag}" },
        },
        pipeline.step {
            name = "Scan", uses = "scan",
            with = { target = "${steps.Image.image}", severity = "CRITICAL" },
            continue_on_failure = true,
        },
        pipeline.step {
            name = "Push", uses = "image.push",
            with = { image = "${steps.Image.image}", registry = "docker.io", credential = "docker-hub" },
            retry = pipeline.retry(2, 5),
        },
        pipeline.step {
            name = "Publish", uses = "artifact.publish",
            with = { artifact = "${steps.Build.artifact}", credential = "nexus" },
        },
        pipeline.step {
            name = "GitOps", uses = "gitops.update",
            with = {
                repo = "git@github.com:acme/deployments.git",
                path = "${env.manifest}",
                tag = "${steps.Image.image}",
                credential = "gitops",
            },
        },
        pipeline.step {
            name = "Sync", uses = "reconciler.sync",
            with = { app = "example-${env.name}", credential = "argocd" },
        },
        pipeline.step {
            name = "Health", uses = "reconciler.wait_healthy",
            with = { app = "example-${env.name}", timeout = 300, credential = "argocd" },
        },
        pipeline.step {
            name = "Verify", uses = "cluster.rollout_status",
            with = { deployment = "example", namespace = "${env.namespace}", credential = "kube" },
            retry = pipeline.retry(3, 10, "exponential"),
        },
    },
}
"#;

fn generate_example_pipeline(output_path: &Path) -> Result<()> {
    let pipelines_dir = output_path.join("pipelines");
    fs::create_dir_all(&pipelines_dir)
        .with_context(|| format!("Failed to create {:?}", pipelines_dir))?;

    let example_path = pipelines_dir.join("example.lua");
    if example_path.exists() {
        println!("  {} pipelines/example.lua (exists)", "Kept".yellow());
        return Ok(());
    }

    fs::write(&example_path, EXAMPLE_PIPELINE)
        .with_context(|| format!("Failed to write {:?}", example_path))?;

    println!("  {} pipelines/example.lua", "Created".green());

    Ok(())
}
