//! Pipeline Definition Loader
//!
//! Entry point for turning definition source into a validated
//! [`PipelineDefinition`]. Loading is a pure parse: the sandbox has no I/O
//! and the only inputs are the source text and the [`LoaderConfig`].

use anyhow::Context;
use keel_core::{KeelError, Result};
use mlua::Table;
use std::path::Path;
use tracing::debug;

use crate::config::LoaderConfig;
use crate::module::ModuleRegistry;
use crate::modules::{MapVarProvider, PipelineModule, VarsModule};
use crate::parser::parse_definition;
use crate::sandbox::create_sandbox;
use crate::validate::validate;
use keel_core::domain::PipelineDefinition;

/// Modules installed for a load with `config`
pub fn definition_registry(config: &LoaderConfig) -> ModuleRegistry {
    ModuleRegistry::new()
        .with(PipelineModule)
        .with(VarsModule::new(MapVarProvider::new(config.vars.clone())))
}

/// Registry used for stub generation, with no variables
pub fn stub_registry() -> ModuleRegistry {
    definition_registry(&LoaderConfig::default())
}

/// Load and validate a definition
///
/// # Errors
/// Returns [`KeelError::MalformedDefinition`] when the source does not
/// evaluate, has the wrong shape, or fails validation. All validation issues
/// are reported in one message.
pub fn load_definition(source: &str, config: &LoaderConfig) -> Result<PipelineDefinition> {
    load_named(source, "pipeline", config)
}

/// Read and load a definition file
pub fn load_definition_file(path: &Path, config: &LoaderConfig) -> Result<PipelineDefinition> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        KeelError::MalformedDefinition(format!("cannot read {}: {}", path.display(), e))
    })?;
    load_named(&source, &path.display().to_string(), config)
}

fn load_named(source: &str, chunk_name: &str, config: &LoaderConfig) -> Result<PipelineDefinition> {
    let definition = evaluate(source, chunk_name, config)
        .map_err(|e| KeelError::MalformedDefinition(format!("{:#}", e)))?;

    let issues = validate(&definition, config);
    if !issues.is_empty() {
        return Err(KeelError::MalformedDefinition(issues.join("; ")));
    }

    debug!(
        "Loaded pipeline '{}' with {} steps from {}",
        definition.name,
        definition.steps.len(),
        chunk_name
    );
    Ok(definition)
}

fn evaluate(
    source: &str,
    chunk_name: &str,
    config: &LoaderConfig,
) -> anyhow::Result<PipelineDefinition> {
    let lua = create_sandbox(&definition_registry(config))
        .context("Failed to create definition sandbox")?;

    let table: Table = lua
        .load(source)
        .set_name(chunk_name)
        .eval()
        .context("Failed to evaluate pipeline definition")?;

    parse_definition(&table, config)
}
