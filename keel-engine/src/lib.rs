//! Keel Engine
//!
//! Runs validated pipeline definitions against external collaborators.
//!
//! This crate contains:
//! - Environment and credential resolution
//! - The execution engine and its per-step state machine
//! - Collaborator traits and the command-line/HTTP adapters behind them
//! - The notifier and the SQLite run store

pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod engine;
pub mod environment;
pub mod notifier;
pub mod store;

pub use cancel::{CancelHandle, CancelSignal, cancellation};
pub use collaborators::Toolchain;
pub use config::EngineConfig;
pub use credentials::{CredentialResolver, CredentialStore, FileCredentialStore, Secret, StaticCredentialStore};
pub use engine::{Engine, PreparedRun, Trigger};
pub use environment::EnvironmentResolver;
pub use notifier::{NotificationChannel, Notifier, RunReport, format_duration};
