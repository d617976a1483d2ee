use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use keel_core::{KeelError, Result};
use regex::Regex;
use std::path::Path;

use super::{CommandRunner, GitOpsRepository, Invocation};
use crate::context::StepContext;
use crate::credentials::Secret;

/// Clones the GitOps repository, rewrites the manifest's image and pushes
pub struct GitManifestRepository {
    runner: CommandRunner,
}

impl GitManifestRepository {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn git(&self, dir: &Path, auth: &[String]) -> Invocation {
        Invocation::new("git")
            .args(auth.iter().cloned())
            .current_dir(dir)
    }

    async fn update_in(
        &self,
        ctx: &StepContext<'_>,
        checkout: &Path,
        repo: &str,
        path: &str,
        tag: &str,
        auth: &[String],
    ) -> Result<String> {
        let parent = checkout.parent().unwrap_or(checkout);
        self.runner
            .run(
                ctx,
                self.git(parent, auth)
                    .args(["clone", "--depth", "1", repo])
                    .arg(checkout.display().to_string()),
            )
            .await?;

        let manifest = checkout.join(path);
        let content = tokio::fs::read_to_string(&manifest)
            .await
            .map_err(|e| KeelError::execution(format!("cannot read {}: {}", path, e)))?;
        let updated = rewrite_image(&content, tag)
            .ok_or_else(|| KeelError::execution(format!("{} has no image line", path)))?;

        if updated != content {
            tokio::fs::write(&manifest, updated)
                .await
                .map_err(|e| KeelError::execution(format!("cannot write {}: {}", path, e)))?;

            self.runner
                .run(
                    ctx,
                    self.git(checkout, auth)
                        .args(["-c", "user.name=keel", "-c", "user.email=keel@localhost"])
                        .args(["commit", "-am"])
                        .arg(format!("Deploy {} (run #{})", tag, ctx.run.number)),
                )
                .await?;
            self.runner
                .run(ctx, self.git(checkout, auth).args(["push", "origin", "HEAD"]))
                .await?;
        } else {
            ctx.info(format!("{} already points at {}", path, tag));
        }

        let head = self
            .runner
            .run(ctx, self.git(checkout, auth).args(["rev-parse", "HEAD"]))
            .await?;
        Ok(head.stdout.trim().to_string())
    }
}

/// Replaces the value of every `image:` line; `None` when there is none
pub fn rewrite_image(manifest: &str, tag: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^([ \t]*-?[ \t]*image:[ \t]*)\S+").ok()?;
    if !re.is_match(manifest) {
        return None;
    }
    let updated = re.replace_all(manifest, |caps: &regex::Captures<'_>| {
        format!("{}{}", &caps[1], tag)
    });
    Some(updated.into_owned())
}

fn auth_args(ctx: &StepContext<'_>, secret: Option<&Secret>) -> Vec<String> {
    let Some(secret) = secret else {
        return Vec::new();
    };
    let basic = STANDARD.encode(format!(
        "{}:{}",
        secret.username().unwrap_or("git"),
        secret.expose()
    ));
    ctx.register_secret(&basic);
    vec![
        "-c".to_string(),
        format!("http.extraHeader=Authorization: Basic {}", basic),
    ]
}

#[async_trait]
impl GitOpsRepository for GitManifestRepository {
    async fn update_manifest(
        &self,
        ctx: &StepContext<'_>,
        repo: &str,
        path: &str,
        tag: &str,
        secret: Option<&Secret>,
    ) -> Result<String> {
        let auth = auth_args(ctx, secret);
        let checkout = self
            .runner
            .workspace()
            .join(".keel")
            .join("gitops")
            .join(format!("{}-{}", ctx.run.run_id, ctx.step.ordinal));
        if let Some(parent) = checkout.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KeelError::execution(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let result = self.update_in(ctx, &checkout, repo, path, tag, &auth).await;
        let _ = tokio::fs::remove_dir_all(&checkout).await;
        result
    }
}
