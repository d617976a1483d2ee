//! Scripted collaborators and end-to-end engine scenarios

use async_trait::async_trait;
use keel_core::domain::{Capability, PipelineDefinition, RunStatus, StepStatus};
use keel_core::{ErrorKind, KeelError, Result};
use keel_lua::{LoaderConfig, load_definition};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Engine, Trigger};
use crate::cancel::cancellation;
use crate::collaborators::{
    ArtifactRepository, BuildOutput, BuildRunner, ClusterApi, ClusterReconciler, GateStatus,
    GitOpsRepository, Health, ImageBuilder, PodInfo, RolloutStatus, ScanReport, Severity,
    ShellRunner, StaticAnalysis, Toolchain, VulnerabilityScanner,
};
use crate::config::EngineConfig;
use crate::context::StepContext;
use crate::credentials::{CredentialResolver, Secret, StaticCredentialStore};
use crate::notifier::Notifier;
use crate::notifier::tests::RecordingChannel;
use crate::store;

// =============================================================================
// Fake toolchain
// =============================================================================

#[derive(Default)]
struct Script {
    failures: VecDeque<KeelError>,
    delay: Option<Duration>,
    calls: u32,
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<Capability, Script>,
    findings: BTreeMap<Severity, u32>,
}

#[derive(Default)]
struct FakeTools {
    state: Mutex<FakeState>,
}

impl FakeTools {
    async fn invoke(&self, capability: Capability) -> Result<()> {
        let (delay, failure) = {
            let mut state = self.state.lock().unwrap();
            let script = state.scripts.entry(capability).or_default();
            script.calls += 1;
            (script.delay, script.failures.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Collaborators that succeed unless told otherwise
pub(crate) struct FakeToolchain {
    tools: Arc<FakeTools>,
}

impl FakeToolchain {
    pub(crate) fn new() -> Self {
        Self {
            tools: Arc::new(FakeTools::default()),
        }
    }

    pub(crate) fn set_findings(&self, severity: Severity, count: u32) {
        let mut state = self.tools.state.lock().unwrap();
        state.findings.insert(severity, count);
    }

    /// The next `times` calls of `capability` fail with `err`
    pub(crate) fn fail_times(&self, capability: Capability, times: usize, err: KeelError) {
        let mut state = self.tools.state.lock().unwrap();
        let script = state.scripts.entry(capability).or_default();
        script.failures.extend(std::iter::repeat_n(err, times));
    }

    pub(crate) fn delay(&self, capability: Capability, delay: Duration) {
        let mut state = self.tools.state.lock().unwrap();
        state.scripts.entry(capability).or_default().delay = Some(delay);
    }

    pub(crate) fn calls(&self, capability: Capability) -> u32 {
        let state = self.tools.state.lock().unwrap();
        state.scripts.get(&capability).map_or(0, |s| s.calls)
    }

    pub(crate) fn toolchain(&self) -> Toolchain {
        Toolchain {
            build: self.tools.clone(),
            images: self.tools.clone(),
            scanner: self.tools.clone(),
            analysis: self.tools.clone(),
            artifacts: self.tools.clone(),
            gitops: self.tools.clone(),
            reconciler: self.tools.clone(),
            cluster: self.tools.clone(),
            shell: self.tools.clone(),
        }
    }
}

#[async_trait]
impl BuildRunner for FakeTools {
    async fn build(&self, _ctx: &StepContext<'_>, _project: &str) -> Result<BuildOutput> {
        self.invoke(Capability::Build).await?;
        Ok(BuildOutput {
            artifact: "target/petclinic.jar".to_string(),
            test_report: Some("target/surefire-reports".to_string()),
        })
    }
}

#[async_trait]
impl ImageBuilder for FakeTools {
    async fn build_image(&self, _ctx: &StepContext<'_>, _context: &str, tag: &str) -> Result<String> {
        self.invoke(Capability::ImageBuild).await?;
        Ok(tag.to_string())
    }

    async fn push(
        &self,
        _ctx: &StepContext<'_>,
        _image: &str,
        _registry: &str,
        _secret: Option<&Secret>,
    ) -> Result<String> {
        self.invoke(Capability::ImagePush).await?;
        Ok(format!("sha256:{}", "ab".repeat(32)))
    }
}

#[async_trait]
impl VulnerabilityScanner for FakeTools {
    async fn scan(&self, _ctx: &StepContext<'_>, _target: &str) -> Result<ScanReport> {
        self.invoke(Capability::Scan).await?;
        let findings = self.state.lock().unwrap().findings.clone();
        Ok(ScanReport {
            report: ".keel/reports/trivy.json".to_string(),
            findings,
        })
    }
}

#[async_trait]
impl StaticAnalysis for FakeTools {
    async fn analyze(
        &self,
        _ctx: &StepContext<'_>,
        _project: &str,
        _secret: Option<&Secret>,
    ) -> Result<String> {
        self.invoke(Capability::AnalysisRun).await?;
        Ok(".scannerwork/report-task.txt".to_string())
    }

    async fn wait_for_gate(
        &self,
        _ctx: &StepContext<'_>,
        _report: &str,
        _timeout: Duration,
        _secret: Option<&Secret>,
    ) -> Result<GateStatus> {
        self.invoke(Capability::AnalysisGate).await?;
        Ok(GateStatus::Passed)
    }
}

#[async_trait]
impl ArtifactRepository for FakeTools {
    async fn publish(
        &self,
        _ctx: &StepContext<'_>,
        artifact: &str,
        _secret: Option<&Secret>,
    ) -> Result<String> {
        self.invoke(Capability::ArtifactPublish).await?;
        Ok(format!("https://nexus.example.com/repository/releases/{}", artifact))
    }
}

#[async_trait]
impl GitOpsRepository for FakeTools {
    async fn update_manifest(
        &self,
        _ctx: &StepContext<'_>,
        _repo: &str,
        _path: &str,
        _tag: &str,
        _secret: Option<&Secret>,
    ) -> Result<String> {
        self.invoke(Capability::GitOpsUpdate).await?;
        Ok("4b825dc642cb6eb9a060e54bf8d69288fbee4904".to_string())
    }
}

#[async_trait]
impl ClusterReconciler for FakeTools {
    async fn sync(&self, _ctx: &StepContext<'_>, _app: &str, _secret: Option<&Secret>) -> Result<String> {
        self.invoke(Capability::ReconcilerSync).await?;
        Ok("4b825dc".to_string())
    }

    async fn wait_healthy(
        &self,
        _ctx: &StepContext<'_>,
        _app: &str,
        _timeout: Duration,
        _secret: Option<&Secret>,
    ) -> Result<Health> {
        self.invoke(Capability::ReconcilerWaitHealthy).await?;
        Ok(Health::Healthy)
    }
}

#[async_trait]
impl ClusterApi for FakeTools {
    async fn apply_manifest(
        &self,
        _ctx: &StepContext<'_>,
        _manifest: &str,
        _namespace: Option<&str>,
        _secret: Option<&Secret>,
    ) -> Result<String> {
        self.invoke(Capability::ClusterApply).await?;
        Ok("deployment.apps/petclinic configured".to_string())
    }

    async fn rollout_status(
        &self,
        _ctx: &StepContext<'_>,
        _deployment: &str,
        _namespace: &str,
        _timeout: Duration,
        _secret: Option<&Secret>,
    ) -> Result<RolloutStatus> {
        self.invoke(Capability::ClusterRolloutStatus).await?;
        Ok(RolloutStatus::Ready)
    }

    async fn get_pods(
        &self,
        _ctx: &StepContext<'_>,
        _selector: &str,
        _namespace: &str,
        _secret: Option<&Secret>,
    ) -> Result<Vec<PodInfo>> {
        self.invoke(Capability::ClusterGetPods).await?;
        Ok(vec![PodInfo {
            name: "petclinic-7d9f8-abcde".to_string(),
            phase: "Running".to_string(),
            ready: true,
        }])
    }
}

#[async_trait]
impl ShellRunner for FakeTools {
    async fn run(
        &self,
        _ctx: &StepContext<'_>,
        command: &str,
        _env: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.invoke(Capability::Shell).await?;
        Ok(command.to_string())
    }
}

// =============================================================================
// Harness
// =============================================================================

const PETCLINIC: &str = r#"
return pipeline.define {
    name = "petclinic",
    credentials = { "docker-hub", "kube" },
    environments = {
        pipeline.environment("main", {
            name = "prod", namespace = "prod", manifest = "k8s/deployment-prod.yaml",
            image_tag = "docker.io/acme/petclinic:${run.number}",
        }),
        pipeline.environment("develop", {
            name = "dev", namespace = "dev", manifest = "k8s/deployment-dev.yaml",
            image_tag = "docker.io/acme/petclinic:dev-${run.number}",
        }),
    },
    fallback = {
        name = "stage", namespace = "stage", manifest = "k8s/deployment-stage.yaml",
        image_tag = "docker.io/acme/petclinic:stage-${run.number}",
    },
    notify = { pipeline.mail("ops@example.com") },
    steps = {
        pipeline.step { name = "Build", uses = "build", with = { project = "." } },
        pipeline.step {
            name = "Scan", uses = "scan",
            with = { target = "${env.image_tag}" },
            continue_on_failure = true,
        },
        pipeline.step {
            name = "Push", uses = "image.push",
            with = { image = "${env.image_tag}", registry = "docker.io", credential = "docker-hub" },
        },
        pipeline.step {
            name = "Deploy", uses = "cluster.apply",
            with = { manifest = "${env.manifest}", namespace = "${env.namespace}", credential = "kube" },
        },
        pipeline.step {
            name = "VerifyRollout", uses = "cluster.rollout_status",
            with = { deployment = "petclinic", namespace = "${env.namespace}", timeout = 120, credential = "kube" },
            retry = pipeline.retry(3, 0),
        },
    },
}
"#;

struct Harness {
    engine: Engine,
    fake: FakeToolchain,
    credentials: CredentialResolver,
    mail: Arc<RecordingChannel>,
}

fn harness(pool: Option<SqlitePool>) -> Harness {
    let fake = FakeToolchain::new();
    let secrets = StaticCredentialStore::new()
        .with("docker-hub", Secret::new("hub-token").with_username("ci"))
        .with("kube", Secret::new("kube-token"));
    let credentials = CredentialResolver::new(Arc::new(secrets));
    let mail = Arc::new(RecordingChannel::default());
    let notifier = Notifier::with_channels(
        mail.clone(),
        Arc::new(RecordingChannel::default()),
        Arc::new(RecordingChannel::default()),
    );
    let engine = Engine::new(
        EngineConfig::default(),
        fake.toolchain(),
        credentials.clone(),
        notifier,
        pool,
    );
    Harness {
        engine,
        fake,
        credentials,
        mail,
    }
}

fn definition(source: &str) -> Arc<PipelineDefinition> {
    Arc::new(load_definition(source, &LoaderConfig::default()).unwrap())
}

fn statuses(run: &keel_core::domain::PipelineRun) -> Vec<(&str, StepStatus)> {
    run.steps
        .iter()
        .map(|r| (r.step.as_str(), r.status))
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_non_blocking_scan_finding_makes_run_unstable() {
    let h = harness(None);
    h.fake.set_findings(Severity::High, 1);

    let run = h
        .engine
        .run(definition(PETCLINIC), Trigger::new("main"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Unstable);
    assert_eq!(run.environment, "prod");
    assert_eq!(
        statuses(&run),
        vec![
            ("Build", StepStatus::Succeeded),
            ("Scan", StepStatus::SucceededWithWarning),
            ("Push", StepStatus::Succeeded),
            ("Deploy", StepStatus::Succeeded),
            ("VerifyRollout", StepStatus::Succeeded),
        ]
    );
    let scan_error = run.step("Scan").and_then(|r| r.error.clone()).unwrap();
    assert_eq!(scan_error.kind, ErrorKind::GateRejected);
    assert!(scan_error.message.contains("docker.io/acme/petclinic:1"), "{}", scan_error.message);
    assert!(run.failure.is_none());

    assert_eq!(h.mail.subjects(), vec!["[keel] petclinic #1 UNSTABLE"]);
    assert_eq!(h.credentials.acquired(), 3);
    assert_eq!(h.credentials.active(), 0);
}

#[tokio::test]
async fn test_blocking_failure_halts_run() {
    let h = harness(None);
    h.fake.fail_times(
        Capability::ClusterApply,
        1,
        KeelError::execution("kubectl exited with 1: token kube-token rejected"),
    );

    let run = h
        .engine
        .run(definition(PETCLINIC), Trigger::new("refs/heads/main"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.branch, "main");
    assert_eq!(run.failed_step(), Some("Deploy"));
    assert_eq!(run.step("VerifyRollout").map(|r| r.status), Some(StepStatus::Skipped));
    assert_eq!(h.fake.calls(Capability::ClusterRolloutStatus), 0);

    let failure = run.failure.clone().unwrap();
    assert_eq!(failure.kind, ErrorKind::StepExecutionFailed);
    assert_eq!(failure.message, "kubectl exited with 1: token **** rejected");

    let bodies = h.mail.bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("Failed step: Deploy"), "{}", bodies[0]);
    assert_eq!(h.credentials.active(), 0);
}

#[tokio::test]
async fn test_retry_bound_is_respected() {
    let h = harness(None);
    h.fake.fail_times(
        Capability::ClusterRolloutStatus,
        10,
        KeelError::DeploymentUnhealthy("0/3 pods ready".to_string()),
    );

    let run = h
        .engine
        .run(definition(PETCLINIC), Trigger::new("main"))
        .await
        .unwrap();

    let verify = run.step("VerifyRollout").unwrap();
    assert_eq!(verify.status, StepStatus::Failed);
    assert_eq!(verify.attempts, 4);
    assert_eq!(h.fake.calls(Capability::ClusterRolloutStatus), 4);
    assert_eq!(run.status, RunStatus::Failed);

    // Push, Deploy and four VerifyRollout attempts
    assert_eq!(h.credentials.acquired(), 6);
    assert_eq!(h.credentials.released(), 6);
}

#[tokio::test]
async fn test_non_retryable_error_is_not_retried() {
    let h = harness(None);
    h.fake.fail_times(
        Capability::ClusterRolloutStatus,
        1,
        KeelError::GateRejected("manual hold".to_string()),
    );

    let run = h
        .engine
        .run(definition(PETCLINIC), Trigger::new("main"))
        .await
        .unwrap();

    assert_eq!(run.step("VerifyRollout").map(|r| r.attempts), Some(1));
    assert_eq!(run.failure.map(|f| f.kind), Some(ErrorKind::GateRejected));
}

#[tokio::test]
async fn test_timeout_releases_credentials() {
    let h = harness(None);
    h.fake.delay(Capability::ClusterApply, Duration::from_secs(5));
    let source = r#"
        return {
            name = "slow",
            credentials = { "kube" },
            fallback = { name = "dev", namespace = "dev", manifest = "k8s/dev.yaml" },
            steps = {
                {
                    name = "Deploy", uses = "cluster.apply",
                    with = { manifest = "k8s/dev.yaml", credential = "kube" },
                    timeout = 0.05, retry = pipeline.retry(1, 0),
                },
            },
        }
    "#;

    let run = h.engine.run(definition(source), Trigger::new("main")).await.unwrap();

    let deploy = &run.steps[0];
    assert_eq!(deploy.status, StepStatus::Failed);
    assert_eq!(deploy.attempts, 2);
    assert_eq!(
        deploy.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::StepTimeout)
    );
    assert_eq!(h.credentials.acquired(), 2);
    assert_eq!(h.credentials.released(), 2);
}

#[tokio::test]
async fn test_cancel_aborts_running_step() {
    let h = harness(None);
    h.fake.delay(Capability::ClusterApply, Duration::from_secs(30));

    let prepared = h
        .engine
        .prepare(definition(PETCLINIC), Trigger::new("main"))
        .await
        .unwrap();
    let (handle, signal) = cancellation();
    let engine = h.engine.clone();
    let task = tokio::spawn(async move { engine.execute(prepared, signal).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.credentials.active(), 1);
    handle.cancel();

    let run = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run should stop after cancel")
        .unwrap();

    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.step("Deploy").map(|r| r.status), Some(StepStatus::Aborted));
    assert_eq!(run.step("VerifyRollout").map(|r| r.status), Some(StepStatus::Skipped));
    assert_eq!(h.fake.calls(Capability::ClusterRolloutStatus), 0);
    assert_eq!(h.credentials.active(), 0);
    assert_eq!(h.mail.subjects(), vec!["[keel] petclinic #1 ABORTED"]);
}

#[tokio::test]
async fn test_conditions_skip_steps() {
    let h = harness(None);
    let source = r#"
        return {
            name = "conditional",
            environments = {
                pipeline.environment("main", { name = "prod", namespace = "prod", manifest = "k8s/prod.yaml" }),
                pipeline.environment("feature/*", { name = "stage", namespace = "stage", manifest = "k8s/stage.yaml" }),
            },
            steps = {
                { name = "Build", uses = "build", with = { project = "." } },
                { name = "Release", uses = "shell", with = { command = "release" }, when = { branch = "main" } },
                { name = "Disabled", uses = "shell", with = { command = "never" }, when = false },
                { name = "Smoke", uses = "shell", with = { command = "smoke" }, when = { environment = "stage" } },
            },
        }
    "#;

    let run = h
        .engine
        .run(definition(source), Trigger::new("feature/login"))
        .await
        .unwrap();

    assert_eq!(run.environment, "stage");
    assert_eq!(
        statuses(&run),
        vec![
            ("Build", StepStatus::Succeeded),
            ("Release", StepStatus::Skipped),
            ("Disabled", StepStatus::Skipped),
            ("Smoke", StepStatus::Succeeded),
        ]
    );
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(h.fake.calls(Capability::Shell), 1);
}

#[tokio::test]
async fn test_step_needing_a_tolerated_failure_does_not_run() {
    let h = harness(None);
    h.fake.set_findings(Severity::Critical, 1);
    let source = r#"
        return {
            name = "gated",
            environments = {
                pipeline.environment("main", { name = "prod", namespace = "prod", manifest = "k8s/prod.yaml" }),
            },
            steps = {
                { name = "Scan", uses = "scan", with = { target = "img" }, continue_on_failure = true },
                { name = "Gate", uses = "shell", with = { command = "gate" }, needs = { "Scan" } },
                { name = "Deploy", uses = "shell", with = { command = "deploy" } },
            },
        }
    "#;

    let run = h
        .engine
        .run(definition(source), Trigger::new("main"))
        .await
        .unwrap();

    assert_eq!(
        statuses(&run),
        vec![
            ("Scan", StepStatus::SucceededWithWarning),
            ("Gate", StepStatus::Failed),
            ("Deploy", StepStatus::Skipped),
        ]
    );
    assert_eq!(h.fake.calls(Capability::Shell), 0);
    assert_eq!(run.status, RunStatus::Failed);
    let failure = run.failure.unwrap();
    assert_eq!(failure.step, "Gate");
    assert!(failure.message.contains("'Scan'"), "{}", failure.message);
}

#[tokio::test]
async fn test_templates_see_run_values_and_earlier_outputs() {
    let h = harness(None);
    let source = r#"
        return {
            name = "petclinic",
            environments = {
                pipeline.environment("main", {
                    name = "prod", namespace = "prod", manifest = "k8s/prod.yaml",
                    image_tag = "docker.io/acme/petclinic:${run.number}",
                }),
            },
            steps = {
                { name = "Build", uses = "build", with = { project = "." } },
                { name = "Image", uses = "image.build", with = { context = ".", tag = "${env.image_tag}" } },
                { name = "Announce", uses = "shell", with = { command = "echo ${steps.Build.artifact} ${params.version}" } },
            },
        }
    "#;
    let pipeline = definition(source);

    h.engine.run(pipeline.clone(), Trigger::new("main").with_parameter("version", "1.0")).await.unwrap();
    let prepared = h
        .engine
        .prepare(pipeline, Trigger::new("main").with_parameter("version", "1.1"))
        .await
        .unwrap();
    assert_eq!(prepared.image_tag(), Some("docker.io/acme/petclinic:2"));

    let run = h.engine.execute(prepared, crate::cancel::CancelSignal::never()).await;
    assert_eq!(run.number, 2);
    assert_eq!(
        run.step("Image").and_then(|r| r.outputs.get("image")).map(String::as_str),
        Some("docker.io/acme/petclinic:2")
    );
    assert_eq!(
        run.step("Announce").and_then(|r| r.outputs.get("stdout")).map(String::as_str),
        Some("echo target/petclinic.jar 1.1")
    );
}

#[tokio::test]
async fn test_missing_credential_fails_without_retry() {
    let h = harness(None);
    let source = r#"
        return {
            name = "publish",
            credentials = { "nexus" },
            fallback = { name = "dev", namespace = "dev", manifest = "k8s/dev.yaml" },
            steps = {
                { name = "Build", uses = "build", with = { project = "." } },
                {
                    name = "Publish", uses = "artifact.publish",
                    with = { artifact = "${steps.Build.artifact}", credential = "nexus" },
                    retry = pipeline.retry(3, 0),
                },
            },
        }
    "#;

    let run = h.engine.run(definition(source), Trigger::new("main")).await.unwrap();

    let publish = run.step("Publish").unwrap();
    assert_eq!(publish.status, StepStatus::Failed);
    assert_eq!(publish.attempts, 0);
    assert_eq!(
        publish.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::CredentialNotFound)
    );
    assert_eq!(h.fake.calls(Capability::ArtifactPublish), 0);
}

#[tokio::test]
async fn test_unmatched_branch_is_fatal_before_any_step() {
    let h = harness(None);
    let source = r#"
        return {
            name = "strict",
            environments = {
                pipeline.environment("main", { name = "prod", namespace = "prod", manifest = "k8s/prod.yaml" }),
            },
            steps = { { name = "Build", uses = "build", with = { project = "." } } },
        }
    "#;

    let err = h
        .engine
        .run(definition(source), Trigger::new("hotfix/urgent"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        KeelError::NoEnvironmentMatch {
            branch: "hotfix/urgent".to_string()
        }
    );
    assert_eq!(h.fake.calls(Capability::Build), 0);
    assert!(h.mail.subjects().is_empty());
}

#[tokio::test]
async fn test_rollback_runs_after_blocking_failure() {
    let h = harness(None);
    h.fake.fail_times(
        Capability::ClusterApply,
        1,
        KeelError::execution("kubectl exited with 1"),
    );
    let source = r#"
        return {
            name = "petclinic",
            credentials = { "kube" },
            fallback = { name = "dev", namespace = "dev", manifest = "k8s/dev.yaml" },
            steps = {
                { name = "Deploy", uses = "cluster.apply", with = { manifest = "${env.manifest}", credential = "kube" } },
                { name = "Verify", uses = "shell", with = { command = "verify" } },
            },
            rollback = {
                { name = "Undo", uses = "shell", with = { command = "kubectl rollout undo deployment/petclinic" } },
            },
        }
    "#;

    let run = h.engine.run(definition(source), Trigger::new("develop")).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.rollback.len(), 1);
    assert_eq!(run.rollback[0].status, StepStatus::Succeeded);
    assert_eq!(h.fake.calls(Capability::Shell), 1);
}

#[tokio::test]
async fn test_concurrent_runs_get_distinct_numbers() {
    let h = harness(None);
    let pipeline = definition(PETCLINIC);

    let (a, b) = tokio::join!(
        h.engine.prepare(pipeline.clone(), Trigger::new("main")),
        h.engine.prepare(pipeline.clone(), Trigger::new("develop")),
    );
    let mut numbers = vec![a.unwrap().run.number, b.unwrap().run.number];
    numbers.sort();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn test_runs_are_persisted() {
    let pool = store::db::test_pool().await;
    let h = harness(Some(pool.clone()));

    let run = h
        .engine
        .run(definition(PETCLINIC), Trigger::new("main"))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);

    let stored = store::find_run(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Succeeded);
    assert_eq!(stored.steps.len(), 5);
    assert_eq!(stored.steps[4].step, "VerifyRollout");
    assert!(stored.completed_at.is_some());

    let logs = store::logs(&pool, run.id).await.unwrap();
    assert!(logs.iter().any(|l| l.message == "Run #1 finished SUCCEEDED"));
    assert!(logs.iter().all(|l| !l.message.contains("hub-token")));

    // Numbering continues from the store for a fresh engine
    let fresh = harness(Some(pool.clone()));
    let next = fresh
        .engine
        .prepare(definition(PETCLINIC), Trigger::new("main"))
        .await
        .unwrap();
    assert_eq!(next.run.number, 2);
}
