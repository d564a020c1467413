use chrono::{DateTime, Utc};
use tally_core::auth::{AccessToken, TokenStore};
use tally_core::remote::R2Config;
use tally_core::util::non_empty_trimmed;

use crate::auth::KeyringTokenStore;
use crate::cli::AuthCommands;
use crate::commands::common::{format_timestamp, load_profile, Context};
use crate::config_profiles::BackendProfile;
use crate::error::CliError;

pub fn run_auth(command: AuthCommands, ctx: &Context) -> Result<(), CliError> {
    let (name, profile) = load_profile(ctx)?;
    let store = KeyringTokenStore::new(&name);

    match command {
        AuthCommands::SetToken {
            access_token,
            refresh_token,
            expires_in,
        } => {
            if profile.backend == BackendProfile::R2 {
                return Err(CliError::Config(format!(
                    "Workspace '{name}' uses R2; credentials come from the R2_* environment variables"
                )));
            }
            let token = build_token(access_token, refresh_token, expires_in)?;
            store.save_token(&token)?;
            println!(
                "Stored access token for workspace '{name}' (expires {})",
                describe_expiry(token.expires_at)
            );
            Ok(())
        }
        AuthCommands::Status => {
            match profile.backend {
                BackendProfile::Drive { .. } => match store.load_token()? {
                    Some(token) if token.is_expired() && token.refresh_token.is_none() => {
                        println!(
                            "Workspace '{name}' has an expired access token ({}). Run `tally auth set-token`.",
                            describe_expiry(token.expires_at)
                        );
                    }
                    Some(token) => println!(
                        "Workspace '{name}' has a stored access token (expires {}{})",
                        describe_expiry(token.expires_at),
                        if token.refresh_token.is_some() {
                            ", refreshable"
                        } else {
                            ""
                        }
                    ),
                    None => println!("Workspace '{name}' has no stored access token."),
                },
                BackendProfile::R2 => match R2Config::from_env()? {
                    Some(config) => println!(
                        "Workspace '{name}' uses R2 bucket {} from the environment.",
                        config.bucket
                    ),
                    None => println!("Workspace '{name}' uses R2 but the R2_* variables are not set."),
                },
            }
            Ok(())
        }
        AuthCommands::Logout => {
            store.clear_token()?;
            println!("Cleared stored credential for workspace '{name}'");
            Ok(())
        }
    }
}

pub fn build_token(
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
) -> Result<AccessToken, CliError> {
    let access_token = non_empty_trimmed(Some(access_token))
        .ok_or_else(|| CliError::Config("--access-token must not be empty".to_string()))?;
    if expires_in <= 0 {
        return Err(CliError::Config(
            "--expires-in must be a positive number of seconds".to_string(),
        ));
    }
    Ok(AccessToken {
        access_token,
        refresh_token: non_empty_trimmed(refresh_token),
        expires_at: Utc::now().timestamp().saturating_add(expires_in),
    })
}

fn describe_expiry(expires_at: i64) -> String {
    DateTime::<Utc>::from_timestamp(expires_at, 0)
        .map_or_else(|| expires_at.to_string(), format_timestamp)
}
