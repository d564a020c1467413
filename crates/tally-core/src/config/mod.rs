//! Engine and workspace configuration.
//!
//! `EngineConfig` carries every timing and sizing knob the sync engine uses.
//! All fields have defaults so a partial JSON object (or none at all) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::non_empty_trimmed;

/// Collections tracked by a workspace when none are configured.
pub const DEFAULT_COLLECTIONS: [&str; 3] = ["financial-entries", "invoices", "clients"];

const DEFAULT_IDLE_DELAY_MS: u64 = 8_000;
const DEFAULT_MIN_SAVE_INTERVAL_MS: u64 = 60_000;
const DEFAULT_CONFLICT_CHECK_INTERVAL_MS: u64 = 90_000;
const DEFAULT_CLOCK_SKEW_TOLERANCE_MS: i64 = 1_000;
const DEFAULT_AUTH_READY_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_IMPORT_BATCH_SIZE: usize = 500;
const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Timing and sizing knobs for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Quiet period after the last edit before an idle autosave is attempted.
    pub idle_delay_ms: u64,
    /// Autosave attempts are skipped when the last successful save is younger than this.
    pub min_save_interval_ms: u64,
    /// Period of the remote conflict check while connected.
    pub conflict_check_interval_ms: u64,
    /// Remote timestamps within this margin of the local sync timestamp are not "newer".
    pub clock_skew_tolerance_ms: i64,
    /// Upper bound on waiting for the auth provider during `connect`.
    pub auth_ready_timeout_ms: u64,
    /// Records per bulk write while importing a collection.
    pub import_batch_size: usize,
    /// Capacity of the coordinator's command channel.
    pub command_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_delay_ms: DEFAULT_IDLE_DELAY_MS,
            min_save_interval_ms: DEFAULT_MIN_SAVE_INTERVAL_MS,
            conflict_check_interval_ms: DEFAULT_CONFLICT_CHECK_INTERVAL_MS,
            clock_skew_tolerance_ms: DEFAULT_CLOCK_SKEW_TOLERANCE_MS,
            auth_ready_timeout_ms: DEFAULT_AUTH_READY_TIMEOUT_MS,
            import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    #[must_use]
    pub const fn min_save_interval(&self) -> Duration {
        Duration::from_millis(self.min_save_interval_ms)
    }

    #[must_use]
    pub const fn conflict_check_interval(&self) -> Duration {
        Duration::from_millis(self.conflict_check_interval_ms)
    }

    #[must_use]
    pub const fn auth_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_ready_timeout_ms)
    }

    /// Batch size clamped to at least one record.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.import_batch_size.max(1)
    }

    /// Parse a config object, rejecting unknown fields.
    pub fn from_json(payload: &str) -> Result<Self, String> {
        serde_json::from_str(payload).map_err(|error| format!("invalid engine config: {error}"))
    }
}

/// An isolated namespace of record collections with its own remote prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workspace {
    /// Stable identifier, also the key for persisted sync state.
    pub id: String,
    /// Prefix for every remote object name written by this workspace.
    pub remote_prefix: String,
    /// Collections included in snapshots, in export order.
    pub collections: Vec<String>,
}

impl Workspace {
    /// Build a workspace, normalizing names and falling back to the default collections.
    pub fn new(
        id: impl Into<String>,
        remote_prefix: Option<String>,
        collections: Vec<String>,
    ) -> Result<Self, String> {
        let id = non_empty_trimmed(Some(id.into()))
            .ok_or_else(|| "workspace id must not be empty".to_string())?;
        let remote_prefix = non_empty_trimmed(remote_prefix)
            .map_or_else(|| sanitize_prefix(&id), |prefix| sanitize_prefix(&prefix));
        if remote_prefix.is_empty() {
            return Err(format!("workspace '{id}' has no usable remote prefix"));
        }

        let mut normalized = Vec::new();
        for name in collections {
            if let Some(name) = non_empty_trimmed(Some(name)) {
                if !normalized.contains(&name) {
                    normalized.push(name);
                }
            }
        }
        if normalized.is_empty() {
            normalized = DEFAULT_COLLECTIONS.iter().map(ToString::to_string).collect();
        }

        Ok(Self {
            id,
            remote_prefix,
            collections: normalized,
        })
    }

    /// Name prefix shared by all manifests of this workspace.
    #[must_use]
    pub fn manifest_prefix(&self) -> String {
        format!("{}_manifest_", self.remote_prefix)
    }

    #[must_use]
    pub fn tracks(&self, collection: &str) -> bool {
        self.collections.iter().any(|name| name == collection)
    }
}

fn sanitize_prefix(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.idle_delay(), Duration::from_secs(8));
        assert_eq!(config.min_save_interval(), Duration::from_secs(60));
        assert_eq!(config.conflict_check_interval(), Duration::from_secs(90));
        assert_eq!(config.clock_skew_tolerance_ms, 1_000);
        assert_eq!(config.batch_size(), 500);
    }

    #[test]
    fn engine_config_accepts_partial_objects() {
        let config = EngineConfig::from_json(r#"{ "import_batch_size": 50 }"#).unwrap();
        assert_eq!(config.import_batch_size, 50);
        assert_eq!(config.idle_delay_ms, 8_000);
    }

    #[test]
    fn engine_config_rejects_unknown_fields() {
        let error = EngineConfig::from_json(r#"{ "idle": 1 }"#).unwrap_err();
        assert!(error.contains("unknown field"));
    }

    #[test]
    fn batch_size_never_zero() {
        let config = EngineConfig {
            import_batch_size: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn workspace_defaults_prefix_and_collections() {
        let workspace = Workspace::new(" Home Office ", None, Vec::new()).unwrap();
        assert_eq!(workspace.id, "Home Office");
        assert_eq!(workspace.remote_prefix, "home-office");
        assert_eq!(
            workspace.collections,
            vec!["financial-entries", "invoices", "clients"]
        );
        assert_eq!(workspace.manifest_prefix(), "home-office_manifest_");
    }

    #[test]
    fn workspace_deduplicates_collections() {
        let workspace = Workspace::new(
            "w",
            Some("books".to_string()),
            vec!["invoices".into(), " invoices ".into(), String::new()],
        )
        .unwrap();
        assert_eq!(workspace.collections, vec!["invoices"]);
        assert!(workspace.tracks("invoices"));
        assert!(!workspace.tracks("clients"));
    }

    #[test]
    fn workspace_rejects_empty_id() {
        assert!(Workspace::new("  ", None, Vec::new()).is_err());
        assert!(Workspace::new("w", Some("::".to_string()), Vec::new()).is_err());
    }
}
