//! Observable sync status.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::remote::{AccountIdentity, RemoteBlob};
use crate::restore::RestoreProgress;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    /// No credential is configured; not retried until the user signs in.
    MissingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    #[default]
    Idle,
    Saving,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    #[default]
    Idle,
    Restoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Connectivity, auth and informational notices.
    Low,
    /// Unsaved local changes are at risk.
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub urgency: Urgency,
    pub text: String,
}

impl StatusMessage {
    pub fn low(text: impl Into<String>) -> Self {
        Self {
            urgency: Urgency::Low,
            text: text.into(),
        }
    }

    pub fn high(text: impl Into<String>) -> Self {
        Self {
            urgency: Urgency::High,
            text: text.into(),
        }
    }
}

/// A remote generation newer than local state while local edits are unsaved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    pub remote_id: String,
    pub remote_name: String,
    pub remote_timestamp: DateTime<Utc>,
    pub local_synced_at: Option<DateTime<Utc>>,
}

impl ConflictInfo {
    pub(crate) fn new(remote: &RemoteBlob, local_synced_at: Option<DateTime<Utc>>) -> Self {
        Self {
            remote_id: remote.id.clone(),
            remote_name: remote.name.clone(),
            remote_timestamp: remote.modified_time,
            local_synced_at,
        }
    }

    /// The remote manifest this conflict refers to.
    #[must_use]
    pub fn manifest(&self) -> RemoteBlob {
        RemoteBlob {
            id: self.remote_id.clone(),
            name: self.remote_name.clone(),
            modified_time: self.remote_timestamp,
            size: 0,
        }
    }
}

/// Snapshot of everything a front end shows about sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub connection: ConnectionState,
    pub save: SaveState,
    pub restore: RestoreState,
    pub online: bool,
    pub dirty: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub account: Option<AccountIdentity>,
    pub conflict: Option<ConflictInfo>,
    pub restore_progress: Option<RestoreProgress>,
    pub message: Option<StatusMessage>,
}

impl SyncStatus {
    /// Replace the message unless a high-urgency one would be hidden by a low one.
    pub(crate) fn post(&mut self, message: StatusMessage) {
        let keep_current = self
            .message
            .as_ref()
            .is_some_and(|current| current.urgency > message.urgency);
        if !keep_current {
            self.message = Some(message);
        }
    }

    /// Drop the current message unless it is high urgency.
    pub(crate) fn clear_low_message(&mut self) {
        if self
            .message
            .as_ref()
            .is_some_and(|message| message.urgency == Urgency::Low)
        {
            self.message = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_urgency_message_survives_low_updates() {
        let mut status = SyncStatus::default();
        status.post(StatusMessage::high("save failed"));
        status.post(StatusMessage::low("offline"));
        status.clear_low_message();
        assert_eq!(status.message, Some(StatusMessage::high("save failed")));

        status.message = None;
        status.post(StatusMessage::low("offline"));
        status.post(StatusMessage::high("save failed"));
        assert_eq!(status.message.as_ref().map(|m| m.urgency), Some(Urgency::High));
    }

    #[test]
    fn connection_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::MissingConfig).unwrap(),
            "\"missing-config\""
        );
    }
}
