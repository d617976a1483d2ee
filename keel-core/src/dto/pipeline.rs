//! Pipeline DTOs

use serde::{Deserialize, Serialize};

/// A definition file known to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<String>,
    /// Validation error, `None` when the definition loads cleanly
    pub error: Option<String>,
}
