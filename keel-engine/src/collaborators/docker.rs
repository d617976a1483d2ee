use async_trait::async_trait;
use keel_core::{KeelError, Result};
use regex::Regex;

use super::{CommandRunner, ImageBuilder, Invocation};
use crate::context::StepContext;
use crate::credentials::Secret;

/// Image build and push through the docker CLI
pub struct DockerImageBuilder {
    runner: CommandRunner,
}

impl DockerImageBuilder {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build_image(&self, ctx: &StepContext<'_>, context: &str, tag: &str) -> Result<String> {
        self.runner
            .run(
                ctx,
                Invocation::new("docker").args(["build", "-t", tag, context]),
            )
            .await?;
        Ok(tag.to_string())
    }

    async fn push(
        &self,
        ctx: &StepContext<'_>,
        image: &str,
        registry: &str,
        secret: Option<&Secret>,
    ) -> Result<String> {
        if let Some(secret) = secret {
            let mut login = Invocation::new("docker").args(["login", registry]);
            if let Some(username) = secret.username() {
                login = login.args(["--username", username]);
            }
            self.runner
                .run(ctx, login.arg("--password-stdin").stdin(secret.expose()))
                .await?;
        }

        let output = self
            .runner
            .run(ctx, Invocation::new("docker").args(["push", image]))
            .await?;

        parse_digest(&output.stdout).ok_or_else(|| {
            KeelError::execution(format!("docker push of {} did not report a digest", image))
        })
    }
}

/// Extracts `sha256:...` from the `digest:` line docker prints after a push
pub fn parse_digest(output: &str) -> Option<String> {
    let re = Regex::new(r"digest: (sha256:[0-9a-f]{64})").ok()?;
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digest() {
        let digest = "a".repeat(64);
        let output = format!(
            "The push refers to repository [docker.io/acme/petclinic]\n\
             5f70bf18a086: Pushed\n\
             42: digest: sha256:{} size: 1570\n",
            digest
        );
        assert_eq!(parse_digest(&output), Some(format!("sha256:{}", digest)));
        assert_eq!(parse_digest("denied: requested access"), None);
    }
}
