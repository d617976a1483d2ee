use async_trait::async_trait;
use keel_core::Result;
use std::collections::BTreeMap;

use super::{CommandRunner, Invocation, ShellRunner};
use crate::context::StepContext;

/// `sh -c <command>` in the workspace
pub struct ShRunner {
    runner: CommandRunner,
}

impl ShRunner {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ShellRunner for ShRunner {
    async fn run(
        &self,
        ctx: &StepContext<'_>,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut invocation = Invocation::new("sh").args(["-c", command]);
        for (key, value) in env {
            invocation = invocation.env(key.clone(), value.clone());
        }
        let output = self.runner.run(ctx, invocation).await?;
        Ok(output.stdout.trim_end().to_string())
    }
}
