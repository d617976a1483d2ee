//! Notification target types

use serde::{Deserialize, Serialize};

use super::run::RunStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelKind {
    Mail { recipients: Vec<String> },
    Webhook { url: String },
    Log,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Mail { .. } => "mail",
            ChannelKind::Webhook { .. } => "webhook",
            ChannelKind::Log => "log",
        }
    }
}

/// A channel plus the terminal statuses it is told about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub channel: ChannelKind,
    /// Empty means every terminal status
    pub on: Vec<RunStatus>,
}

impl NotificationTarget {
    pub fn wants(&self, status: RunStatus) -> bool {
        self.on.is_empty() || self.on.contains(&status)
    }
}
