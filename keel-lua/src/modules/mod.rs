//! Modules available to pipeline definitions

pub mod pipeline;
pub mod vars;

pub use pipeline::PipelineModule;
pub use vars::{MapVarProvider, VarProvider, VarsModule};
