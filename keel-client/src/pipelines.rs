//! Pipeline-related API endpoints

use crate::KeelClient;
use crate::error::Result;
use keel_core::domain::PipelineDefinition;
use keel_core::dto::pipeline::PipelineInfo;

impl KeelClient {
    /// List the server's definitions with their validation state
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>> {
        let response = self.client.get(self.url("/api/pipelines")).send().await?;
        self.handle_response(response).await
    }

    /// Get a validated definition by name
    pub async fn get_pipeline(&self, name: &str) -> Result<PipelineDefinition> {
        let url = self.url(&format!("/api/pipelines/{}", name));
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }
}
