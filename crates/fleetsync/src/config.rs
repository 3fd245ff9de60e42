//! CLI configuration: thin wrapper around `fleetsync_config`.
//!
//! Re-exports the shared types and adds resolution that respects
//! `GlobalOpts` flag overrides (--api-url, --username, etc.).

use fleetsync_config::CredentialStore;
use fleetsync_core::SyncConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use fleetsync_config::{
    Config, CredentialStatus, Profile, config_path, load_config_or_default, save_config,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.active_profile_name(global.profile.as_deref())
}

/// Comma-separated profile names for help text.
pub fn available_profiles(config: &Config) -> String {
    if config.profiles.is_empty() {
        "(none)".into()
    } else {
        config
            .profiles
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Apply flag overrides to a copy of `profile`.
pub fn apply_overrides(profile: &Profile, global: &GlobalOpts) -> Profile {
    let mut profile = profile.clone();
    if let Some(ref url) = global.api_url {
        profile.api_url.clone_from(url);
    }
    if let Some(ref username) = global.username {
        profile.username = Some(username.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
    profile
}

/// Load the config file, pick the profile and layer flag overrides on
/// top. Returns the profile name alongside the resolved configuration.
///
/// Without a stored profile, flags and `FLEETSYNC_*` env vars alone can
/// describe the account as long as a username is given.
pub fn resolve_sync_config(global: &GlobalOpts) -> Result<(String, SyncConfig), CliError> {
    let cfg = load_config_or_default();
    let name = active_profile_name(global, &cfg);

    let base = match cfg.profiles.get(&name) {
        Some(profile) => profile.clone(),
        None if global.username.is_some() => Profile::default(),
        None => {
            return Err(CliError::ProfileNotFound {
                name,
                available: available_profiles(&cfg),
            });
        }
    };

    let profile = apply_overrides(&base, global);
    let sync_config = fleetsync_config::profile_to_sync_config(
        &profile,
        &name,
        &cfg.defaults,
        &CredentialStore::system(),
    )?;

    tracing::debug!(profile = %name, url = %sync_config.url, "resolved sync config");
    Ok((name, sync_config))
}
