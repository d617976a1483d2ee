//! Pipeline Service
//!
//! Definitions are `<name>.lua` files in the pipelines directory and are
//! loaded fresh on every request, so edits apply to the next run.

use keel_core::KeelError;
use keel_core::domain::PipelineDefinition;
use keel_core::dto::pipeline::PipelineInfo;
use keel_lua::{LoaderConfig, load_definition_file};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "lua";

/// Service error type
#[derive(Debug)]
pub enum PipelineError {
    NotFound(String),
    Invalid(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Path of a named definition, rejecting names that leave the directory
pub fn definition_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(PipelineError::NotFound(name.to_string()));
    }
    Ok(dir.join(format!("{}.{}", name, EXTENSION)))
}

/// Load and validate a definition by name
pub fn load_pipeline(dir: &Path, name: &str, config: &LoaderConfig) -> Result<PipelineDefinition> {
    let path = definition_path(dir, name)?;
    if !path.is_file() {
        return Err(PipelineError::NotFound(name.to_string()));
    }

    load_definition_file(&path, config).map_err(|e| match e {
        KeelError::MalformedDefinition(msg) => PipelineError::Invalid(msg),
        other => PipelineError::Invalid(other.to_string()),
    })
}

/// Every definition in the directory with its validation state
pub fn list_pipelines(dir: &Path, config: &LoaderConfig) -> Result<Vec<PipelineInfo>> {
    if !dir.is_dir() {
        tracing::warn!("Pipelines directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .iter()
        .filter_map(|path| {
            let name = path.file_stem()?.to_str()?.to_string();
            Some(match load_definition_file(path, config) {
                Ok(definition) => PipelineInfo {
                    name,
                    description: definition.description,
                    steps: definition.steps.into_iter().map(|s| s.name).collect(),
                    error: None,
                },
                Err(e) => PipelineInfo {
                    name,
                    description: None,
                    steps: Vec::new(),
                    error: Some(e.to_string()),
                },
            })
        })
        .collect())
}
