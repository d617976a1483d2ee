//! Core domain types
//!
//! These types are produced by the definition loader, consumed by the
//! execution engine and persisted by the run store. Everything here is plain
//! data; matching and execution logic lives in `keel-engine`.

pub mod capability;
pub mod environment;
pub mod log;
pub mod notification;
pub mod pipeline;
pub mod run;
pub mod step;

pub use capability::{Capability, Severity};
pub use environment::{EnvironmentBinding, EnvironmentTable};
pub use log::{LogEntry, LogLevel};
pub use notification::{ChannelKind, NotificationTarget};
pub use pipeline::{CredentialDeclaration, PipelineDefinition};
pub use run::{PipelineRun, RunFailure, RunStatus};
pub use step::{Backoff, Condition, RetryPolicy, StepDescriptor, StepError, StepResult, StepStatus};
