//! Pre-run validation of a parsed definition
//!
//! Every problem is collected so a single load reports all of them. A
//! definition that passes cannot fail later for reasons visible in its text:
//! unknown credentials, dangling step references and unreachable environments
//! are caught here, before any side effect.

use keel_core::domain::{
    Backoff, ChannelKind, Condition, EnvironmentBinding, PipelineDefinition, Severity,
    StepDescriptor,
};
use keel_core::template;
use std::collections::{HashMap, HashSet};

use crate::config::LoaderConfig;

const RUN_FIELDS: &[&str] = &["number", "id"];
const ENV_FIELDS: &[&str] = &["name", "namespace", "manifest", "image_tag"];

/// Validate `definition`, returning every issue found
pub fn validate(definition: &PipelineDefinition, config: &LoaderConfig) -> Vec<String> {
    let mut issues = Vec::new();

    if definition.name.trim().is_empty() {
        issues.push("pipeline name must not be empty".to_string());
    }
    if definition.steps.is_empty() {
        issues.push("pipeline must have at least one step".to_string());
    }

    check_credentials(definition, &mut issues);
    check_environments(definition, config, &mut issues);
    check_notify(definition, &mut issues);
    check_steps(definition, config, &mut issues);

    issues
}

fn check_credentials(definition: &PipelineDefinition, issues: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for credential in &definition.credentials {
        if credential.name.trim().is_empty() {
            issues.push("credential names must not be empty".to_string());
        } else if !seen.insert(credential.name.as_str()) {
            issues.push(format!("credential '{}' is declared twice", credential.name));
        }
    }
}

fn check_environments(
    definition: &PipelineDefinition,
    config: &LoaderConfig,
    issues: &mut Vec<String>,
) {
    let environments = &definition.environments;
    if environments.is_empty() {
        issues.push("no environment rules and no fallback are defined".to_string());
        return;
    }

    let mut patterns = HashSet::new();
    for rule in &environments.rules {
        if !patterns.insert(rule.pattern.as_str()) {
            issues.push(format!(
                "environment pattern '{}' appears twice, the second rule can never match",
                rule.pattern
            ));
        }
    }

    for binding in environments.bindings() {
        for (field, value) in [
            ("name", &binding.name),
            ("namespace", &binding.namespace),
            ("manifest", &binding.manifest),
        ] {
            if value.trim().is_empty() {
                issues.push(format!(
                    "environment '{}' has an empty '{}'",
                    binding.pattern, field
                ));
            }
        }
        if let Some(image_tag) = &binding.image_tag {
            check_binding_template(binding, image_tag, config, issues);
        }
    }
}

fn check_binding_template(
    binding: &EnvironmentBinding,
    image_tag: &str,
    config: &LoaderConfig,
    issues: &mut Vec<String>,
) {
    let owner = format!("environment '{}' image_tag", binding.name);
    let references = match template::references(image_tag) {
        Ok(references) => references,
        Err(e) => {
            issues.push(format!("{}: {}", owner, e));
            return;
        }
    };
    for reference in references {
        if reference.starts_with("steps.") || reference == "env.image_tag" {
            issues.push(format!(
                "{}: '${{{}}}' is not available in environment templates",
                owner, reference
            ));
            continue;
        }
        check_reference(reference, &owner, &Scope::default(), config, issues);
    }
}

fn check_notify(definition: &PipelineDefinition, issues: &mut Vec<String>) {
    for target in &definition.notify {
        match &target.channel {
            ChannelKind::Mail { recipients } => {
                if recipients.is_empty() {
                    issues.push("mail notification has no recipients".to_string());
                }
                for recipient in recipients {
                    if !recipient.contains('@') {
                        issues.push(format!("'{}' is not a mail address", recipient));
                    }
                }
            }
            ChannelKind::Webhook { url } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    issues.push(format!("webhook url '{}' must be http(s)", url));
                }
            }
            ChannelKind::Log => {}
        }
        for status in &target.on {
            if !status.is_terminal() {
                issues.push(format!(
                    "notification filter '{}' is not a terminal run status",
                    status
                ));
            }
        }
    }
}

/// Steps visible to a reference, by name
#[derive(Default)]
struct Scope<'a> {
    steps: HashMap<&'a str, &'a StepDescriptor>,
    environment_names: HashSet<&'a str>,
    every_binding_has_image_tag: bool,
}

fn check_steps(definition: &PipelineDefinition, config: &LoaderConfig, issues: &mut Vec<String>) {
    let mut scope = Scope {
        steps: HashMap::new(),
        environment_names: definition
            .environments
            .bindings()
            .map(|b| b.name.as_str())
            .collect(),
        every_binding_has_image_tag: definition
            .environments
            .bindings()
            .all(|b| b.image_tag.is_some()),
    };

    let mut names = HashSet::new();
    for step in definition.steps.iter().chain(definition.rollback.iter()) {
        if !names.insert(step.name.as_str()) {
            issues.push(format!("step name '{}' is used more than once", step.name));
        }
        check_step(definition, step, &scope, config, issues);
        scope.steps.insert(step.name.as_str(), step);
    }
}

fn check_step(
    definition: &PipelineDefinition,
    step: &StepDescriptor,
    scope: &Scope<'_>,
    config: &LoaderConfig,
    issues: &mut Vec<String>,
) {
    let owner = format!("step '{}'", step.name);

    if step.name.trim().is_empty() || step.name.contains(['.', '{', '}']) {
        issues.push(format!(
            "{}: name must be non-empty and must not contain '.', '{{' or '}}'",
            owner
        ));
    }

    let capability = step.capability;
    for required in capability.required_params() {
        match step.param(required) {
            Some(value) if !value.trim().is_empty() => {}
            _ => issues.push(format!(
                "{}: capability '{}' requires parameter '{}'",
                owner, capability, required
            )),
        }
    }
    for key in step.params.keys() {
        if !capability.accepts_param(key) {
            issues.push(format!(
                "{}: capability '{}' does not accept parameter '{}'",
                owner, capability, key
            ));
        }
    }
    for output in &step.outputs {
        if !capability.outputs().contains(&output.as_str()) {
            issues.push(format!(
                "{}: capability '{}' does not produce output '{}'",
                owner, capability, output
            ));
        }
    }

    for credential in &step.credentials {
        if !definition.declares_credential(credential) {
            issues.push(format!(
                "{}: references undeclared credential '{}'",
                owner, credential
            ));
        }
    }
    if let Some(credential) = step.param("credential") {
        if template::references(credential).map(|r| !r.is_empty()).unwrap_or(false) {
            issues.push(format!("{}: 'credential' must be a literal name", owner));
        }
    }
    if let Some(timeout) = step.param("timeout") {
        let templated = template::references(timeout).map(|r| !r.is_empty()).unwrap_or(true);
        let valid = timeout.trim().parse::<u64>().map(|secs| secs > 0).unwrap_or(false);
        if !templated && !valid {
            issues.push(format!(
                "{}: 'timeout' must be a positive number of seconds, got '{}'",
                owner, timeout
            ));
        }
    }

    if let Some(severity) = step.param("severity") {
        let templated = template::references(severity).map(|r| !r.is_empty()).unwrap_or(true);
        if !templated && severity.parse::<Severity>().is_err() {
            issues.push(format!(
                "{}: 'severity' must be one of UNKNOWN, LOW, MEDIUM, HIGH, CRITICAL, got '{}'",
                owner, severity
            ));
        }
    }

    for need in &step.needs {
        if need == &step.name {
            issues.push(format!("{}: cannot depend on itself", owner));
        } else if !scope.steps.contains_key(need.as_str()) {
            issues.push(format!(
                "{}: depends on '{}', which is not an earlier step",
                owner, need
            ));
        }
    }

    for value in step.params.values() {
        match template::references(value) {
            Ok(references) => {
                for reference in references {
                    check_reference(reference, &owner, scope, config, issues);
                }
            }
            Err(e) => issues.push(format!("{}: {}", owner, e)),
        }
    }

    if step.retry.max_retries > config.max_retries {
        issues.push(format!(
            "{}: {} retries exceeds the limit of {}",
            owner, step.retry.max_retries, config.max_retries
        ));
    }
    if let Backoff::Exponential { factor } = step.retry.backoff {
        if !(factor >= 1.0 && factor.is_finite()) {
            issues.push(format!("{}: backoff factor must be at least 1", owner));
        }
    }
    if step.timeout_ms == 0 {
        issues.push(format!("{}: timeout must be greater than zero", owner));
    }

    if let Condition::Environment(names) = &step.when {
        for name in names {
            if !scope.environment_names.contains(name.as_str()) {
                issues.push(format!(
                    "{}: 'when' names unknown environment '{}'",
                    owner, name
                ));
            }
        }
    }
}

fn check_reference(
    reference: &str,
    owner: &str,
    scope: &Scope<'_>,
    config: &LoaderConfig,
    issues: &mut Vec<String>,
) {
    let (root, rest) = reference.split_once('.').unwrap_or((reference, ""));
    let problem = match root {
        "branch" if rest.is_empty() => None,
        "run" if RUN_FIELDS.contains(&rest) => None,
        "env" if rest == "image_tag" && !scope.every_binding_has_image_tag => {
            Some("not every environment defines 'image_tag'".to_string())
        }
        "env" if ENV_FIELDS.contains(&rest) => None,
        "vars" if !rest.is_empty() => {
            if config.vars.contains_key(rest) {
                None
            } else {
                Some(format!("variable '{}' is not defined", rest))
            }
        }
        "params" if !rest.is_empty() => None,
        "steps" => match rest.split_once('.') {
            Some((producer, output)) => match scope.steps.get(producer) {
                Some(step) if step.outputs.iter().any(|o| o == output) => None,
                Some(_) => Some(format!("step '{}' does not declare output '{}'", producer, output)),
                None => Some(format!("'{}' is not an earlier step", producer)),
            },
            None => Some("expected steps.<step>.<output>".to_string()),
        },
        _ => Some("unknown reference".to_string()),
    };

    if let Some(problem) = problem {
        issues.push(format!("{}: '${{{}}}': {}", owner, reference, problem));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_definition;
    use keel_core::KeelError;

    const ENVIRONMENTS: &str = r#"
        environments = {
            pipeline.environment("main", { name = "prod", namespace = "prod", manifest = "k8s/deployment-prod.yaml" }),
        },
    "#;

    fn issues_for(steps: &str) -> String {
        let source = format!(
            r#"return {{ name = "app", credentials = {{ "docker-hub" }}, {} steps = {{ {} }} }}"#,
            ENVIRONMENTS, steps
        );
        match load_definition(&source, &LoaderConfig::default()) {
            Err(KeelError::MalformedDefinition(msg)) => msg,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => String::new(),
        }
    }

    #[test]
    fn test_valid_definition_has_no_issues() {
        let msg = issues_for(
            r#"
            { name = "Build", uses = "build", with = { project = "." } },
            { name = "Push", uses = "image.push", with = { image = "${steps.Build.artifact}", registry = "docker.io", credential = "docker-hub" } },
        "#,
        );
        assert_eq!(msg, "");
    }

    #[test]
    fn test_undeclared_credential() {
        let msg = issues_for(
            r#"{ name = "Push", uses = "image.push", with = { image = "app", registry = "docker.io", credential = "harbor" } }"#,
        );
        assert!(msg.contains("undeclared credential 'harbor'"), "{msg}");
    }

    #[test]
    fn test_missing_and_unknown_params() {
        let msg = issues_for(r#"{ name = "Scan", uses = "scan", with = { severity = "HIGH", depth = 3 } }"#);
        assert!(msg.contains("requires parameter 'target'"), "{msg}");
        assert!(msg.contains("does not accept parameter 'depth'"), "{msg}");
    }

    #[test]
    fn test_duplicate_step_names() {
        let msg = issues_for(
            r#"
            { name = "Build", uses = "build", with = { project = "." } },
            { name = "Build", uses = "build", with = { project = "." } },
        "#,
        );
        assert!(msg.contains("'Build' is used more than once"), "{msg}");
    }

    #[test]
    fn test_forward_step_reference() {
        let msg = issues_for(
            r#"
            { name = "Publish", uses = "shell", with = { command = "echo ${steps.Build.artifact}" } },
            { name = "Build", uses = "build", with = { project = "." } },
        "#,
        );
        assert!(msg.contains("'Build' is not an earlier step"), "{msg}");
    }

    #[test]
    fn test_undeclared_output_reference() {
        let msg = issues_for(
            r#"
            { name = "Build", uses = "build", with = { project = "." }, outputs = { "artifact" } },
            { name = "Report", uses = "shell", with = { command = "cat ${steps.Build.test_report}" } },
        "#,
        );
        assert!(msg.contains("does not declare output 'test_report'"), "{msg}");
    }

    #[test]
    fn test_retry_cap_and_timeout() {
        let msg = issues_for(r#"{ name = "Verify", uses = "shell", with = { command = "true" }, retry = 50, timeout = 0 }"#);
        assert!(msg.contains("exceeds the limit"), "{msg}");
        assert!(msg.contains("timeout must be greater than zero"), "{msg}");
    }

    #[test]
    fn test_timeout_param_must_be_seconds() {
        let msg = issues_for(
            r#"{ name = "Rollout", uses = "cluster.rollout_status", with = { deployment = "app", namespace = "prod", timeout = "2m" } }"#,
        );
        assert!(msg.contains("'timeout' must be a positive number of seconds, got '2m'"), "{msg}");

        let msg = issues_for(
            r#"{ name = "Rollout", uses = "cluster.rollout_status", with = { deployment = "app", namespace = "prod", timeout = 120 } }"#,
        );
        assert_eq!(msg, "");
    }

    #[test]
    fn test_scan_severity_must_be_known() {
        let msg = issues_for(
            r#"{ name = "Scan", uses = "scan", with = { target = "img", severity = "SEVERE" }, retry = pipeline.retry(2, 0) }"#,
        );
        assert!(msg.contains("'severity' must be one of"), "{msg}");
        assert!(msg.contains("got 'SEVERE'"), "{msg}");

        let msg = issues_for(r#"{ name = "Scan", uses = "scan", with = { target = "img", severity = "critical" } }"#);
        assert_eq!(msg, "");
    }

    #[test]
    fn test_undefined_variable() {
        let msg = issues_for(r#"{ name = "Sh", uses = "shell", with = { command = "echo ${vars.MISSING}" } }"#);
        assert!(msg.contains("variable 'MISSING' is not defined"), "{msg}");
    }

    #[test]
    fn test_image_tag_reference_requires_every_binding() {
        let msg = issues_for(r#"{ name = "Sh", uses = "shell", with = { command = "echo ${env.image_tag}" } }"#);
        assert!(msg.contains("not every environment defines 'image_tag'"), "{msg}");
    }

    #[test]
    fn test_no_environment_and_bad_notify() {
        let source = r#"
            return {
                name = "app",
                notify = { pipeline.mail("nobody"), pipeline.webhook("ftp://chat"), pipeline.log({ on = { "running" } }) },
                steps = { { name = "Sh", uses = "shell", with = { command = "true" } } },
            }
        "#;
        let err = load_definition(source, &LoaderConfig::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("no environment rules and no fallback"), "{msg}");
        assert!(msg.contains("'nobody' is not a mail address"), "{msg}");
        assert!(msg.contains("must be http(s)"), "{msg}");
        assert!(msg.contains("not a terminal run status"), "{msg}");
    }
}
