//! Definition table parser
//!
//! Converts the table returned by a definition into a [`PipelineDefinition`].
//! This pass checks shapes and types only; cross-references (credentials,
//! step outputs, environments) are checked afterwards by
//! [`validate`](crate::validate).

use anyhow::{Context, Result, anyhow, bail};
use keel_core::domain::{
    Backoff, Capability, ChannelKind, Condition, CredentialDeclaration, EnvironmentBinding,
    EnvironmentTable, NotificationTarget, PipelineDefinition, RetryPolicy, RunStatus,
    StepDescriptor,
};
use keel_core::template;
use mlua::{Table, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::LoaderConfig;

/// Pattern recorded on the fallback binding
pub const FALLBACK_PATTERN: &str = "**";

/// Parse an evaluated definition table
///
/// # Errors
/// Returns an error if required fields are missing (name, steps, step
/// name/uses) or a field has the wrong type.
pub fn parse_definition(pipeline: &Table, config: &LoaderConfig) -> Result<PipelineDefinition> {
    let name = required_string(pipeline, "name", "Pipeline")?;
    let description = optional_string(pipeline, "description")?;

    let credentials = parse_credentials(pipeline).context("Invalid 'credentials'")?;
    let environments = parse_environments(pipeline).context("Invalid 'environments'")?;
    let notify = parse_notify(pipeline).context("Invalid 'notify'")?;

    let steps = match pipeline.get::<Value>("steps")? {
        Value::Table(table) => parse_steps(&table, 0, config)?,
        Value::Nil => bail!("Pipeline must have a 'steps' field"),
        other => bail!(
            "Field 'steps' must be an array of steps, found {}",
            other.type_name()
        ),
    };

    let rollback = match pipeline.get::<Value>("rollback")? {
        Value::Table(table) => parse_steps(&table, steps.len(), config).context("Invalid 'rollback'")?,
        Value::Nil => Vec::new(),
        other => bail!(
            "Field 'rollback' must be an array of steps, found {}",
            other.type_name()
        ),
    };

    Ok(PipelineDefinition {
        name,
        description,
        credentials,
        environments,
        notify,
        steps,
        rollback,
    })
}

// ============================================================================
// Global configuration
// ============================================================================

fn parse_credentials(pipeline: &Table) -> Result<Vec<CredentialDeclaration>> {
    let table = match pipeline.get::<Value>("credentials")? {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(t) => t,
        other => bail!("expected an array, found {}", other.type_name()),
    };

    let mut credentials = Vec::new();
    for entry in table.sequence_values::<Value>() {
        match entry? {
            Value::String(s) => credentials.push(CredentialDeclaration {
                name: s.to_str()?.to_string(),
                description: None,
            }),
            Value::Table(t) => credentials.push(CredentialDeclaration {
                name: required_string(&t, "name", "Credential")?,
                description: optional_string(&t, "description")?,
            }),
            other => bail!(
                "credential entries must be names or tables, found {}",
                other.type_name()
            ),
        }
    }
    Ok(credentials)
}

fn parse_environments(pipeline: &Table) -> Result<EnvironmentTable> {
    let mut environments = EnvironmentTable::default();

    match pipeline.get::<Value>("environments")? {
        Value::Nil => {}
        Value::Table(table) => {
            for entry in table.sequence_values::<Table>() {
                let binding = entry.context("environment entries must be tables")?;
                let pattern = required_string(&binding, "pattern", "Environment")?;
                let parsed = parse_binding(&binding, pattern.clone())
                    .with_context(|| format!("Environment '{}'", pattern))?;
                environments.rules.push(parsed);
            }
        }
        other => bail!("expected an array, found {}", other.type_name()),
    }

    match pipeline.get::<Value>("fallback")? {
        Value::Nil => {}
        Value::Table(binding) => {
            environments.fallback = Some(
                parse_binding(&binding, FALLBACK_PATTERN.to_string())
                    .context("Invalid 'fallback'")?,
            );
        }
        other => bail!("'fallback' must be a table, found {}", other.type_name()),
    }

    Ok(environments)
}

fn parse_binding(binding: &Table, pattern: String) -> Result<EnvironmentBinding> {
    Ok(EnvironmentBinding {
        pattern,
        name: required_string(binding, "name", "Environment")?,
        namespace: required_string(binding, "namespace", "Environment")?,
        manifest: required_string(binding, "manifest", "Environment")?,
        image_tag: optional_string(binding, "image_tag")?,
    })
}

fn parse_notify(pipeline: &Table) -> Result<Vec<NotificationTarget>> {
    let table = match pipeline.get::<Value>("notify")? {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(t) => t,
        other => bail!("expected an array, found {}", other.type_name()),
    };

    let mut targets = Vec::new();
    for entry in table.sequence_values::<Table>() {
        let target = entry.context("notification targets must be tables")?;
        let kind = required_string(&target, "type", "Notification target")?;
        let channel = match kind.as_str() {
            "mail" => ChannelKind::Mail {
                recipients: string_list(&target, "recipients")?,
            },
            "webhook" => ChannelKind::Webhook {
                url: required_string(&target, "url", "Webhook target")?,
            },
            "log" => ChannelKind::Log,
            other => bail!("unknown notification type '{}'", other),
        };

        let on = string_list(&target, "on")?
            .iter()
            .map(|s| s.parse::<RunStatus>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;

        targets.push(NotificationTarget { channel, on });
    }
    Ok(targets)
}

// ============================================================================
// Steps
// ============================================================================

fn parse_steps(table: &Table, first_ordinal: usize, config: &LoaderConfig) -> Result<Vec<StepDescriptor>> {
    let mut steps = Vec::new();
    for (index, entry) in table.sequence_values::<Value>().enumerate() {
        let step = match entry? {
            Value::Table(t) => t,
            other => bail!("step #{} must be a table, found {}", index + 1, other.type_name()),
        };
        steps.push(parse_step(&step, first_ordinal + index, config)?);
    }
    Ok(steps)
}

fn parse_step(step: &Table, ordinal: usize, config: &LoaderConfig) -> Result<StepDescriptor> {
    let name = required_string(step, "name", "Step")?;
    let context = || format!("Step '{}'", name);

    let uses = required_string(step, "uses", "Step").with_context(context)?;
    let capability = uses
        .parse::<Capability>()
        .map_err(|e| anyhow!(e))
        .with_context(context)?;

    let params = parse_params(step).with_context(context)?;

    let mut credentials = string_list(step, "credentials").with_context(context)?;
    if let Some(credential) = params.get("credential") {
        if !credential.contains("${") && !credentials.contains(credential) {
            credentials.push(credential.clone());
        }
    }

    // Step outputs referenced from templates are inputs too
    let mut needs = string_list(step, "needs").with_context(context)?;
    for value in params.values() {
        for reference in template::references(value).with_context(context)? {
            let producer = reference
                .strip_prefix("steps.")
                .and_then(|rest| rest.split_once('.'))
                .map(|(producer, _)| producer);
            if let Some(producer) = producer {
                if !needs.iter().any(|n| n == producer) {
                    needs.push(producer.to_string());
                }
            }
        }
    }

    let outputs = match step.get::<Value>("outputs")? {
        Value::Nil => capability.outputs().iter().map(|s| s.to_string()).collect(),
        _ => string_list(step, "outputs").with_context(context)?,
    };

    let retry = parse_retry(step.get::<Value>("retry")?, config).with_context(context)?;

    let timeout = seconds(step.get::<Value>("timeout")?)
        .with_context(|| format!("Step '{}': invalid 'timeout'", name))?
        .unwrap_or(config.default_timeout);

    let continue_on_failure = optional_bool(step, "continue_on_failure")?.unwrap_or(false)
        || optional_bool(step, "blocking")? == Some(false);

    let when = parse_condition(step.get::<Value>("when")?).with_context(context)?;

    Ok(StepDescriptor {
        name,
        ordinal,
        capability,
        params,
        credentials,
        needs,
        outputs,
        retry,
        timeout_ms: timeout.as_millis() as u64,
        continue_on_failure,
        when,
    })
}

fn parse_params(step: &Table) -> Result<BTreeMap<String, String>> {
    let table = match step.get::<Value>("with")? {
        Value::Nil => return Ok(BTreeMap::new()),
        Value::Table(t) => t,
        other => bail!("'with' must be a table, found {}", other.type_name()),
    };

    let mut params = BTreeMap::new();
    for pair in table.pairs::<String, Value>() {
        let (key, value) = pair?;
        let value = scalar_to_string(&value)
            .with_context(|| format!("parameter '{}'", key))?;
        params.insert(key, value);
    }
    Ok(params)
}

fn parse_retry(value: Value, config: &LoaderConfig) -> Result<RetryPolicy> {
    match value {
        Value::Nil => Ok(RetryPolicy::fixed(0, config.default_retry_delay)),
        Value::Integer(_) | Value::Number(_) => {
            Ok(RetryPolicy::fixed(retry_count(&value)?, config.default_retry_delay))
        }
        Value::Table(table) => {
            let max = match table.get::<Value>("max")? {
                Value::Nil => bail!("retry table must have a 'max' field"),
                other => retry_count(&other)?,
            };
            let delay = seconds(table.get::<Value>("delay")?)
                .context("invalid retry 'delay'")?
                .unwrap_or(config.default_retry_delay);

            let backoff = match optional_string(&table, "backoff")?.as_deref() {
                None | Some("fixed") => Backoff::Fixed,
                Some("exponential") => Backoff::Exponential {
                    factor: optional_number(&table, "factor")?.unwrap_or(2.0),
                },
                Some(other) => bail!("unknown backoff '{}'", other),
            };

            let max_delay = seconds(table.get::<Value>("max_delay")?)
                .context("invalid retry 'max_delay'")?
                .unwrap_or(match backoff {
                    Backoff::Fixed => delay,
                    Backoff::Exponential { .. } => delay.max(Duration::from_secs(300)),
                });

            Ok(RetryPolicy {
                max_retries: max,
                delay_ms: delay.as_millis() as u64,
                backoff,
                max_delay_ms: max_delay.as_millis() as u64,
            })
        }
        other => bail!("'retry' must be a number or a table, found {}", other.type_name()),
    }
}

fn retry_count(value: &Value) -> Result<u32> {
    let count = match value {
        Value::Integer(n) => *n,
        Value::Number(n) if n.fract() == 0.0 => *n as i64,
        other => bail!("retry count must be an integer, found {}", other.type_name()),
    };
    u32::try_from(count).map_err(|_| anyhow!("retry count must not be negative, got {}", count))
}

fn parse_condition(value: Value) -> Result<Condition> {
    match value {
        Value::Nil | Value::Boolean(true) => Ok(Condition::Always),
        Value::Boolean(false) => Ok(Condition::Never),
        Value::Table(table) => {
            if optional_bool(&table, "enabled")? == Some(false) {
                return Ok(Condition::Never);
            }

            let mut branches = string_list(&table, "branch")?;
            branches.extend(string_list(&table, "branches")?);
            let mut environments = string_list(&table, "environment")?;
            environments.extend(string_list(&table, "environments")?);

            match (branches.is_empty(), environments.is_empty()) {
                (true, true) => Ok(Condition::Always),
                (false, true) => Ok(Condition::Branch(branches)),
                (true, false) => Ok(Condition::Environment(environments)),
                (false, false) => bail!("'when' may restrict by branch or by environment, not both"),
            }
        }
        other => bail!("'when' must be a boolean or a table, found {}", other.type_name()),
    }
}

// ============================================================================
// Field helpers
// ============================================================================

fn optional_string(table: &Table, key: &str) -> Result<Option<String>> {
    match table.get::<Value>(key)? {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.to_str()?.to_string())),
        other => bail!("field '{}' must be a string, found {}", key, other.type_name()),
    }
}

fn required_string(table: &Table, key: &str, owner: &str) -> Result<String> {
    optional_string(table, key)?.ok_or_else(|| anyhow!("{} must have a '{}' field", owner, key))
}

fn optional_bool(table: &Table, key: &str) -> Result<Option<bool>> {
    match table.get::<Value>(key)? {
        Value::Nil => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        other => bail!("field '{}' must be a boolean, found {}", key, other.type_name()),
    }
}

fn optional_number(table: &Table, key: &str) -> Result<Option<f64>> {
    match table.get::<Value>(key)? {
        Value::Nil => Ok(None),
        Value::Integer(n) => Ok(Some(n as f64)),
        Value::Number(n) => Ok(Some(n)),
        other => bail!("field '{}' must be a number, found {}", key, other.type_name()),
    }
}

/// A single string or an array of strings
fn string_list(table: &Table, key: &str) -> Result<Vec<String>> {
    match table.get::<Value>(key)? {
        Value::Nil => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s.to_str()?.to_string()]),
        Value::Table(list) => {
            let mut values = Vec::new();
            for entry in list.sequence_values::<Value>() {
                match entry? {
                    Value::String(s) => values.push(s.to_str()?.to_string()),
                    other => bail!(
                        "field '{}' must contain only strings, found {}",
                        key,
                        other.type_name()
                    ),
                }
            }
            Ok(values)
        }
        other => bail!(
            "field '{}' must be a string or an array of strings, found {}",
            key,
            other.type_name()
        ),
    }
}

/// Seconds as an integer or float; zero is passed through for validation
fn seconds(value: Value) -> Result<Option<Duration>> {
    let secs = match value {
        Value::Nil => return Ok(None),
        Value::Integer(n) => n as f64,
        Value::Number(n) => n,
        other => bail!("expected seconds, found {}", other.type_name()),
    };
    if !secs.is_finite() || secs < 0.0 {
        bail!("expected a non-negative number of seconds, got {}", secs);
    }
    Ok(Some(Duration::from_millis((secs * 1000.0).round() as u64)))
}

fn scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.to_str()?.to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok((*n as i64).to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        other => bail!(
            "expected a string, number or boolean, found {}",
            other.type_name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::definition_registry;
    use crate::sandbox::create_sandbox;

    fn parse(source: &str) -> Result<PipelineDefinition> {
        let config = LoaderConfig::default();
        let lua = create_sandbox(&definition_registry(&config)).unwrap();
        let table: Table = lua.load(source).eval()?;
        parse_definition(&table, &config)
    }

    #[test]
    fn test_parse_minimal_definition() {
        let definition = parse(
            r#"
            return {
                name = "petclinic",
                fallback = { name = "dev", namespace = "dev", manifest = "k8s/dev.yaml" },
                steps = {
                    { name = "Build", uses = "build", with = { project = "." } },
                },
            }
        "#,
        )
        .unwrap();

        assert_eq!(definition.name, "petclinic");
        assert_eq!(definition.steps.len(), 1);

        let build = &definition.steps[0];
        assert_eq!(build.capability, Capability::Build);
        assert_eq!(build.param("project"), Some("."));
        assert_eq!(build.outputs, vec!["artifact", "test_report"]);
        assert_eq!(build.timeout(), LoaderConfig::default().default_timeout);
        assert!(build.is_blocking());
        assert_eq!(build.when, Condition::Always);

        let fallback = definition.environments.fallback.unwrap();
        assert_eq!(fallback.pattern, FALLBACK_PATTERN);
    }

    #[test]
    fn test_parse_step_options() {
        let definition = parse(
            r#"
            return pipeline.define {
                name = "petclinic",
                credentials = { "docker-hub", pipeline.credential("kubeconfig", { description = "cluster" }) },
                steps = {
                    pipeline.step {
                        name = "Build",
                        uses = "build",
                        with = { project = "." },
                    },
                    pipeline.step {
                        name = "Scan",
                        uses = "scan",
                        with = { target = "app:${run.number}", severity = "HIGH" },
                        blocking = false,
                    },
                    pipeline.step {
                        name = "Push",
                        uses = "image.push",
                        with = { image = "app:1", registry = "docker.io", credential = "docker-hub" },
                        retry = pipeline.retry(2, 1.5),
                        timeout = 30,
                    },
                    pipeline.step {
                        name = "Publish",
                        uses = "artifact.publish",
                        with = { artifact = "${steps.Build.artifact}", credential = "nexus" },
                        when = { branch = "main" },
                    },
                    pipeline.step {
                        name = "Disabled",
                        uses = "shell",
                        with = { command = "true", retries = 3 },
                        when = false,
                    },
                },
            }
        "#,
        )
        .unwrap();

        assert_eq!(definition.credentials.len(), 2);
        assert_eq!(definition.credentials[1].description.as_deref(), Some("cluster"));

        let scan = &definition.steps[1];
        assert!(scan.continue_on_failure);

        let push = &definition.steps[2];
        assert_eq!(push.credentials, vec!["docker-hub"]);
        assert_eq!(push.retry.max_retries, 2);
        assert_eq!(push.retry.delay_ms, 1500);
        assert_eq!(push.timeout_ms, 30_000);

        let publish = &definition.steps[3];
        assert_eq!(publish.needs, vec!["Build"]);
        assert_eq!(publish.when, Condition::Branch(vec!["main".to_string()]));

        let disabled = &definition.steps[4];
        assert_eq!(disabled.when, Condition::Never);
        assert_eq!(disabled.param("retries"), Some("3"));
        assert_eq!(disabled.ordinal, 4);
    }

    #[test]
    fn test_parse_notify_targets() {
        let definition = parse(
            r#"
            return {
                name = "petclinic",
                notify = {
                    pipeline.mail({ "dev@example.com", "ops@example.com" }, { on = { "failed", "unstable" } }),
                    pipeline.webhook("https://chat.example.com/hook"),
                    pipeline.log(),
                },
                steps = { { name = "Build", uses = "build", with = { project = "." } } },
            }
        "#,
        )
        .unwrap();

        assert_eq!(definition.notify.len(), 3);
        assert_eq!(
            definition.notify[0].on,
            vec![RunStatus::Failed, RunStatus::Unstable]
        );
        assert!(matches!(
            &definition.notify[0].channel,
            ChannelKind::Mail { recipients } if recipients.len() == 2
        ));
        assert!(definition.notify[1].on.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        let err = parse(r#"return { steps = {} }"#).unwrap_err();
        assert!(err.to_string().contains("'name'"));

        let err = parse(r#"return { name = "x" }"#).unwrap_err();
        assert!(err.to_string().contains("'steps'"));

        let err = parse(r#"return { name = "x", steps = { { name = "A", uses = "teleport" } } }"#)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("unknown capability 'teleport'"));

        let err = parse(
            r#"return { name = "x", steps = { { name = "A", uses = "shell", timeout = -1 } } }"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("timeout"));

        let err = parse(
            r#"return { name = "x", steps = { { name = "A", uses = "shell", retry = -2 } } }"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("negative"));
    }

    #[test]
    fn test_parse_exponential_retry() {
        let definition = parse(
            r#"
            return {
                name = "x",
                steps = {
                    {
                        name = "Verify",
                        uses = "cluster.rollout_status",
                        with = { deployment = "app", namespace = "prod" },
                        retry = { max = 3, delay = 1, backoff = "exponential", factor = 3, max_delay = 5 },
                    },
                },
            }
        "#,
        )
        .unwrap();

        let retry = definition.steps[0].retry;
        assert_eq!(retry.backoff, Backoff::Exponential { factor: 3.0 });
        assert_eq!(retry.max_delay_ms, 5000);
    }
}
