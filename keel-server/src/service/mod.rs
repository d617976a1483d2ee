//! Service Module
//!
//! Business logic between the HTTP handlers, the definition directory and
//! the engine's run store.

pub mod pipeline;
pub mod run;

// Re-export for convenience
pub use pipeline as pipeline_service;
pub use run as run_service;
