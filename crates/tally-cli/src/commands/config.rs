use tally_core::util::{is_http_url, non_empty_trimmed};

use crate::cli::{BackendKind, ConfigCommands};
use crate::commands::common::Context;
use crate::config_profiles::{BackendProfile, CliWorkspacesConfig, WorkspaceProfile};
use crate::error::CliError;

/// Flags accepted by `tally config init`.
#[derive(Debug, Default)]
pub struct InitOptions {
    pub backend: Option<BackendKind>,
    pub remote_prefix: Option<String>,
    pub collections: Vec<String>,
    pub api_base_url: Option<String>,
    pub upload_base_url: Option<String>,
    pub token_endpoint: Option<String>,
    pub client_id: Option<String>,
}

pub fn run_config(command: ConfigCommands, ctx: &Context) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            backend,
            remote_prefix,
            collections,
            api_base_url,
            upload_base_url,
            token_endpoint,
            client_id,
            no_activate,
        } => run_config_init(
            ctx,
            InitOptions {
                backend,
                remote_prefix,
                collections,
                api_base_url,
                upload_base_url,
                token_endpoint,
                client_id,
            },
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(ctx),
    }
}

fn run_config_init(ctx: &Context, options: InitOptions, no_activate: bool) -> Result<(), CliError> {
    let mut config = CliWorkspacesConfig::load()?;
    let name = config.resolve_workspace_name(ctx.workspace.as_deref());
    let existing = config.workspace(&name).cloned().unwrap_or_default();

    let profile = apply_init_options(existing, options)?;
    let workspace = profile.to_workspace(&name)?;
    *config.workspace_mut_or_default(&name) = profile;

    if !no_activate || config.active_workspace.is_none() {
        config.active_workspace = Some(name.clone());
    }
    let path = config.save()?;

    println!("Saved workspace '{name}' to {}", path.display());
    println!("Tracked collections: {}", workspace.collections.join(", "));
    if config.active_workspace.as_deref() == Some(name.as_str()) {
        println!("Active workspace: {name}");
    }
    Ok(())
}

/// Merge explicit flags over an existing profile.
pub fn apply_init_options(
    mut profile: WorkspaceProfile,
    options: InitOptions,
) -> Result<WorkspaceProfile, CliError> {
    match (options.backend, &profile.backend) {
        (Some(BackendKind::R2), _) => profile.backend = BackendProfile::R2,
        (Some(BackendKind::Drive), BackendProfile::R2) => {
            profile.backend = BackendProfile::default();
        }
        _ => {}
    }

    if let Some(prefix) = non_empty_trimmed(options.remote_prefix) {
        profile.remote_prefix = Some(prefix);
    }
    let collections: Vec<String> = options
        .collections
        .into_iter()
        .filter_map(|name| non_empty_trimmed(Some(name)))
        .collect();
    if !collections.is_empty() {
        profile.collections = collections;
    }

    let api_base_url = validated_url("--api-base-url", options.api_base_url)?;
    let upload_base_url = validated_url("--upload-base-url", options.upload_base_url)?;
    let token_endpoint = validated_url("--token-endpoint", options.token_endpoint)?;
    let client_id = non_empty_trimmed(options.client_id);

    match &mut profile.backend {
        BackendProfile::Drive {
            api_base_url: current_api,
            upload_base_url: current_upload,
            token_endpoint: current_endpoint,
            client_id: current_client,
        } => {
            if api_base_url.is_some() {
                *current_api = api_base_url;
            }
            if upload_base_url.is_some() {
                *current_upload = upload_base_url;
            }
            if token_endpoint.is_some() {
                *current_endpoint = token_endpoint;
            }
            if client_id.is_some() {
                *current_client = client_id;
            }
        }
        BackendProfile::R2 => {
            if api_base_url.is_some()
                || upload_base_url.is_some()
                || token_endpoint.is_some()
                || client_id.is_some()
            {
                return Err(CliError::Config(
                    "Drive options cannot be combined with the r2 backend".to_string(),
                ));
            }
        }
    }

    Ok(profile)
}

fn validated_url(flag: &str, value: Option<String>) -> Result<Option<String>, CliError> {
    match non_empty_trimmed(value) {
        Some(url) if !is_http_url(&url) => Err(CliError::Config(format!(
            "{flag} must start with http:// or https://, got {url}"
        ))),
        other => Ok(other),
    }
}

fn run_config_show(ctx: &Context) -> Result<(), CliError> {
    let config = CliWorkspacesConfig::load()?;
    let name = config.resolve_workspace_name(ctx.workspace.as_deref());
    let profile = config
        .workspace(&name)
        .ok_or_else(|| CliError::WorkspaceNotConfigured(name.clone()))?;
    let workspace = profile.to_workspace(&name)?;

    let view = serde_json::json!({
        "workspace": name,
        "active": config.active_workspace.as_deref() == Some(name.as_str()),
        "remote_prefix": workspace.remote_prefix,
        "collections": workspace.collections,
        "backend": profile.backend,
        "engine": profile.engine_config(),
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
