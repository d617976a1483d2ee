//! Keel Lua Infrastructure
//!
//! Pipeline definitions are Lua files evaluated in a restricted sandbox.
//! This crate provides:
//! - Module trait and registry for the globals exposed to definitions
//! - The `pipeline` DSL module and the `vars` module
//! - Parsing of the returned table into a [`PipelineDefinition`]
//! - Validation of the parsed definition before any step runs
//! - Stub generation for local development

pub mod config;
pub mod loader;
pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;
pub mod validate;

pub use config::LoaderConfig;
pub use loader::{definition_registry, load_definition, load_definition_file, stub_registry};
pub use module::{KeelModule, ModuleRegistry};
pub use modules::{MapVarProvider, PipelineModule, VarProvider, VarsModule};
pub use sandbox::create_sandbox;

pub use keel_core::domain::PipelineDefinition;
