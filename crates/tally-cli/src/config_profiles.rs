//! Persistent CLI workspace configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tally_core::config::{EngineConfig, Workspace};
use tally_core::remote::DriveConfig;
use tally_core::util::non_empty_trimmed;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "cli-config.json";
const DEFAULT_WORKSPACE: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliWorkspacesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_workspace: Option<String>,
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceProfile {
    #[serde(default)]
    pub remote_prefix: Option<String>,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub backend: BackendProfile,
    /// Overrides for engine timings; defaults apply when absent.
    #[serde(default)]
    pub engine: Option<EngineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendProfile {
    Drive {
        #[serde(default)]
        api_base_url: Option<String>,
        #[serde(default)]
        upload_base_url: Option<String>,
        #[serde(default)]
        token_endpoint: Option<String>,
        #[serde(default)]
        client_id: Option<String>,
    },
    /// Credentials come from the `R2_*` environment variables.
    R2,
}

impl Default for BackendProfile {
    fn default() -> Self {
        Self::Drive {
            api_base_url: None,
            upload_base_url: None,
            token_endpoint: None,
            client_id: None,
        }
    }
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("tally").join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI config directory".to_string()))
}

pub fn normalize_workspace_name(value: Option<&str>) -> Option<String> {
    non_empty_trimmed(value.map(ToString::to_string))
}

impl CliWorkspacesConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!("Failed to read config at {}: {}", path.display(), error))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!("Failed to parse config at {}: {}", path.display(), error))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                CliError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                ))
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized).map_err(|error| {
            CliError::Config(format!("Failed to write config at {}: {}", path.display(), error))
        })
    }

    /// Explicit flag, then `TALLY_WORKSPACE`, then the active workspace.
    pub fn resolve_workspace_name(&self, explicit: Option<&str>) -> String {
        if let Some(name) = normalize_workspace_name(explicit) {
            return name;
        }
        if let Some(name) =
            normalize_workspace_name(std::env::var("TALLY_WORKSPACE").ok().as_deref())
        {
            return name;
        }
        if let Some(name) = normalize_workspace_name(self.active_workspace.as_deref()) {
            return name;
        }
        DEFAULT_WORKSPACE.to_string()
    }

    pub fn workspace(&self, name: &str) -> Option<&WorkspaceProfile> {
        self.workspaces.get(name)
    }

    pub fn workspace_mut_or_default(&mut self, name: &str) -> &mut WorkspaceProfile {
        self.workspaces.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_workspace = normalize_workspace_name(self.active_workspace.as_deref());
        for profile in self.workspaces.values_mut() {
            profile.normalize();
        }
    }
}

impl WorkspaceProfile {
    /// Engine view of this profile.
    pub fn to_workspace(&self, name: &str) -> Result<Workspace, CliError> {
        Workspace::new(name, self.remote_prefix.clone(), self.collections.clone())
            .map_err(CliError::Config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_default()
    }

    pub fn drive_config(&self) -> Option<DriveConfig> {
        let BackendProfile::Drive {
            api_base_url,
            upload_base_url,
            ..
        } = &self.backend
        else {
            return None;
        };
        let defaults = DriveConfig::default();
        Some(DriveConfig {
            api_base_url: api_base_url.clone().unwrap_or(defaults.api_base_url),
            upload_base_url: upload_base_url.clone().unwrap_or(defaults.upload_base_url),
            space: defaults.space,
        })
    }

    fn normalize(&mut self) {
        self.remote_prefix = non_empty_trimmed(self.remote_prefix.take());
        self.collections = std::mem::take(&mut self.collections)
            .into_iter()
            .filter_map(|name| non_empty_trimmed(Some(name)))
            .collect();
        if let BackendProfile::Drive {
            api_base_url,
            upload_base_url,
            token_endpoint,
            client_id,
        } = &mut self.backend
        {
            *api_base_url = non_empty_trimmed(api_base_url.take());
            *upload_base_url = non_empty_trimmed(upload_base_url.take());
            *token_endpoint = non_empty_trimmed(token_endpoint.take());
            *client_id = non_empty_trimmed(client_id.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn normalize_workspace_name_rejects_empty() {
        assert_eq!(normalize_workspace_name(None), None);
        assert_eq!(normalize_workspace_name(Some(" ")), None);
        assert_eq!(normalize_workspace_name(Some(" books ")), Some("books".to_string()));
    }

    #[test]
    fn config_roundtrip_normalizes_profiles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliWorkspacesConfig {
            version: 1,
            active_workspace: Some(" books ".to_string()),
            workspaces: BTreeMap::new(),
        };
        config.workspaces.insert(
            "books".to_string(),
            WorkspaceProfile {
                remote_prefix: Some(" acme ".to_string()),
                collections: vec![" invoices ".to_string(), " ".to_string()],
                backend: BackendProfile::Drive {
                    api_base_url: Some(" https://drive.example.com/v3 ".to_string()),
                    upload_base_url: None,
                    token_endpoint: Some(" ".to_string()),
                    client_id: None,
                },
                engine: None,
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliWorkspacesConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.active_workspace.as_deref(), Some("books"));

        let profile = loaded.workspace("books").unwrap();
        assert_eq!(profile.remote_prefix.as_deref(), Some("acme"));
        assert_eq!(profile.collections, vec!["invoices".to_string()]);
        assert_eq!(
            profile.backend,
            BackendProfile::Drive {
                api_base_url: Some("https://drive.example.com/v3".to_string()),
                upload_base_url: None,
                token_endpoint: None,
                client_id: None,
            }
        );
        assert_eq!(
            profile.drive_config().unwrap().upload_base_url,
            DriveConfig::default().upload_base_url
        );
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = CliWorkspacesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliWorkspacesConfig::default());
    }

    #[test]
    fn resolve_workspace_name_prefers_explicit_then_active() {
        let config = CliWorkspacesConfig {
            version: 1,
            active_workspace: Some("work".to_string()),
            workspaces: BTreeMap::new(),
        };
        assert_eq!(config.resolve_workspace_name(Some("home")), "home");
        if std::env::var_os("TALLY_WORKSPACE").is_none() {
            assert_eq!(config.resolve_workspace_name(None), "work");
        }
    }

    #[test]
    fn profile_engine_overrides_are_partial() {
        let profile: WorkspaceProfile = serde_json::from_str(
            r#"{ "backend": { "kind": "r2" }, "engine": { "idle_delay_ms": 2000 } }"#,
        )
        .unwrap();
        assert_eq!(profile.backend, BackendProfile::R2);
        assert!(profile.drive_config().is_none());
        let engine = profile.engine_config();
        assert_eq!(engine.idle_delay_ms, 2000);
        assert_eq!(engine.import_batch_size, EngineConfig::default().import_batch_size);
    }
}
