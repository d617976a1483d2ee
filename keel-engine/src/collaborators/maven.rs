use async_trait::async_trait;
use keel_core::{KeelError, Result};
use std::path::Path;

use super::{BuildOutput, BuildRunner, CommandRunner, Invocation};
use crate::context::StepContext;

/// `mvn -B package`, artifact taken from `<project>/target`
pub struct MavenBuildRunner {
    runner: CommandRunner,
}

impl MavenBuildRunner {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl BuildRunner for MavenBuildRunner {
    async fn build(&self, ctx: &StepContext<'_>, project: &str) -> Result<BuildOutput> {
        let project_dir = self.runner.workspace().join(project);

        self.runner
            .run(
                ctx,
                Invocation::new("mvn")
                    .args(["-B", "package"])
                    .current_dir(&project_dir),
            )
            .await?;

        let target = project_dir.join("target");
        let artifact = find_artifact(&target).await?.ok_or_else(|| {
            KeelError::execution(format!("no artifact found in {}", target.display()))
        })?;

        let reports = target.join("surefire-reports");
        let test_report = tokio::fs::metadata(&reports)
            .await
            .ok()
            .filter(|m| m.is_dir())
            .map(|_| reports.display().to_string());

        ctx.info(format!("Built {}", artifact));
        Ok(BuildOutput {
            artifact,
            test_report,
        })
    }
}

/// First packaged jar or war, ignoring source and javadoc archives
async fn find_artifact(target: &Path) -> Result<Option<String>> {
    let mut entries = tokio::fs::read_dir(target)
        .await
        .map_err(|e| KeelError::execution(format!("cannot read {}: {}", target.display(), e)))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| KeelError::execution(format!("cannot read {}: {}", target.display(), e)))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_primary_artifact(&name) {
            candidates.push(entry.path().display().to_string());
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn is_primary_artifact(name: &str) -> bool {
    (name.ends_with(".jar") || name.ends_with(".war"))
        && !name.ends_with("-sources.jar")
        && !name.ends_with("-javadoc.jar")
        && !name.starts_with("original-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_artifact_filter() {
        assert!(is_primary_artifact("petclinic-3.1.jar"));
        assert!(is_primary_artifact("app.war"));
        assert!(!is_primary_artifact("petclinic-3.1-sources.jar"));
        assert!(!is_primary_artifact("original-petclinic-3.1.jar"));
        assert!(!is_primary_artifact("classes"));
    }

    #[tokio::test]
    async fn test_find_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app-1.0-sources.jar"), "").unwrap();
        std::fs::write(dir.path().join("app-1.0.jar"), "").unwrap();

        let found = find_artifact(dir.path()).await.unwrap().unwrap();
        assert!(found.ends_with("app-1.0.jar"));
    }
}
