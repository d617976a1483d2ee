//! Child process execution for the CLI adapters
//!
//! Every child is spawned with `kill_on_drop`, so dropping the step future
//! on timeout or cancellation stops the process. Output is logged through
//! the run context, which redacts registered secrets.

use keel_core::{KeelError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::context::StepContext;

/// Characters of stderr kept in error messages
const ERROR_TAIL: usize = 2000;

/// A command line plus its environment
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
    dir: Option<PathBuf>,
    quiet: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
            dir: None,
            quiet: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Written to the child's stdin, e.g. for `--password-stdin`
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Keep stdout out of the run log (machine-readable output)
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs invocations inside the workspace
#[derive(Debug, Clone)]
pub struct CommandRunner {
    workspace: PathBuf,
}

impl CommandRunner {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Runs to completion and returns the output whatever the exit status
    pub async fn output(&self, ctx: &StepContext<'_>, invocation: Invocation) -> Result<CommandOutput> {
        let dir = invocation
            .dir
            .clone()
            .unwrap_or_else(|| self.workspace.clone());
        let line = invocation.command_line();
        ctx.info(format!("$ {}", line));
        debug!(step = %ctx.step.name, dir = %dir.display(), "Running {}", invocation.program);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        for (key, value) in &invocation.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            KeelError::execution(format!("failed to start {}: {}", invocation.program, e))
        })?;

        if let (Some(input), Some(mut pipe)) = (&invocation.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(|e| {
                KeelError::execution(format!("failed to write to {}: {}", invocation.program, e))
            })?;
            drop(pipe);
        }

        let output = child.wait_with_output().await.map_err(|e| {
            KeelError::execution(format!("failed to wait for {}: {}", invocation.program, e))
        })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };

        if !invocation.quiet {
            for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
                ctx.info(line);
            }
        }
        for line in result.stderr.lines().filter(|l| !l.trim().is_empty()) {
            ctx.warn(line);
        }

        Ok(result)
    }

    /// Runs to completion and fails on a non-zero exit status
    pub async fn run(&self, ctx: &StepContext<'_>, invocation: Invocation) -> Result<CommandOutput> {
        let program = invocation.program.clone();
        let output = self.output(ctx, invocation).await?;
        if output.success() {
            return Ok(output);
        }
        Err(KeelError::execution(failure_message(ctx, &program, &output)))
    }
}

/// `<program> exited with <code>: <stderr tail>`, secrets redacted
pub fn failure_message(ctx: &StepContext<'_>, program: &str, output: &CommandOutput) -> String {
    let code = output
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let detail = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    let start = detail
        .char_indices()
        .rev()
        .nth(ERROR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    ctx.redact(&format!("{} exited with {}: {}", program, code, &detail[start..]))
}
