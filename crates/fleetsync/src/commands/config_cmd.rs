//! Config subcommand handlers.

use std::fmt::Write;

use dialoguer::{Input, Select};
use secrecy::SecretString;

use fleetsync_config::CredentialStore;
use fleetsync_core::{AccountType, PasswordHash};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, CredentialStatus, Profile};
use crate::error::CliError;
use crate::output;

const MASK: &str = "****";

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of `cfg` with every secret replaced by a mask.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(MASK.into());
        }
        if profile.password_hash.is_some() {
            profile.password_hash = Some(MASK.into());
        }
    }
    cfg
}

/// TOML-like rendering with secrets masked and the credential status of
/// each profile.
fn format_config(cfg: &Config, store: &CredentialStore) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    let _ = writeln!(out, "poll_interval = {}", cfg.defaults.poll_interval);

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "api_url = \"{}\"", p.api_url);
        if let Some(ref u) = p.username {
            let _ = writeln!(out, "username = \"{u}\"");
        }
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"{MASK}\"");
        }
        if p.password_hash.is_some() {
            let _ = writeln!(out, "password_hash = \"{MASK}\"");
        }
        let _ = writeln!(out, "origin = \"{}\"", p.origin);
        let _ = writeln!(out, "account_type = \"{}\"", p.account_type.as_wire());
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(interval) = p.poll_interval {
            let _ = writeln!(out, "poll_interval = {interval}");
        }
        if let Some(adaptive) = p.adaptive {
            let _ = writeln!(out, "adaptive = {adaptive}");
        }
        let status = match store.status(p, name) {
            CredentialStatus::Configured { source } => format!("ready ({})", source.describe()),
            CredentialStatus::NotConfigured { missing } => {
                format!("missing {}", missing.join(", "))
            }
        };
        let _ = writeln!(out, "# credentials: {status}");
    }

    out
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Prompt for a non-empty password and hash it immediately.
fn prompt_password_hash() -> Result<PasswordHash, CliError> {
    let pass = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
    if pass.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }
    Ok(PasswordHash::from_plain(&SecretString::from(pass)))
}

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    CliError::ProfileNotFound {
        name,
        available: config::available_profiles(cfg),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),
        ConfigCommand::Show => show(global),
        ConfigCommand::SetPassword { profile } => set_password(profile, global),
        ConfigCommand::Use { name } => use_profile(name),
        ConfigCommand::Remove { name } => remove(&name),
    }
}

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("FleetSync configuration");
    eprintln!("   Config path: {}\n", config_path.display());

    let mut cfg = config::load_config_or_default();

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default(global.profile.clone().unwrap_or_else(|| "default".into()))
        .interact_text()
        .map_err(prompt_err)?;

    let api_url: String = Input::new()
        .with_prompt("API URL")
        .default(fleetsync_config::DEFAULT_API_URL.into())
        .validate_with(|s: &String| url::Url::parse(s).map(|_| ()).map_err(|e| e.to_string()))
        .interact_text()
        .map_err(prompt_err)?;

    let username: String = Input::new()
        .with_prompt("Username")
        .interact_text()
        .map_err(prompt_err)?;
    if username.trim().is_empty() {
        return Err(CliError::Validation {
            field: "username".into(),
            reason: "username cannot be empty".into(),
        });
    }

    let account_type = match Select::new()
        .with_prompt("Account type")
        .items(&["User account", "Device account"])
        .default(0)
        .interact()
        .map_err(prompt_err)?
    {
        0 => AccountType::User,
        _ => AccountType::Device,
    };

    let hash = prompt_password_hash()?;

    let storage = Select::new()
        .with_prompt("Where to store the password hash?")
        .items(&[
            "System keyring (recommended)",
            "Config file (password_hash)",
        ])
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    let password_hash = if storage == 0 {
        CredentialStore::system().store_hash(&profile_name, &hash)?;
        eprintln!("   Password hash stored in system keyring");
        None
    } else {
        Some(hash.as_str().to_owned())
    };

    let profile = Profile {
        api_url,
        username: Some(username.trim().to_owned()),
        password_hash,
        account_type,
        ..Profile::default()
    };

    cfg.profiles.insert(profile_name.clone(), profile);
    cfg.default_profile = Some(profile_name.clone());
    config::save_config(&cfg)?;

    eprintln!("\nConfiguration written to {}", config_path.display());
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Test it: fleetsync login");
    Ok(())
}

fn show(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config_or_default();
    let masked = redacted(&cfg);
    let store = CredentialStore::system();
    let out = output::render_single(
        global.output,
        &masked,
        |_| format_config(&cfg, &store),
        |c| c.profiles.keys().cloned().collect::<Vec<_>>().join("\n"),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

fn set_password(profile: Option<String>, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config_or_default();
    let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
    if !cfg.profiles.contains_key(&profile_name) {
        return Err(profile_not_found(profile_name, &cfg));
    }

    let hash = prompt_password_hash()?;
    CredentialStore::system().store_hash(&profile_name, &hash)?;

    eprintln!("Password hash stored in system keyring for profile '{profile_name}'");
    Ok(())
}

fn use_profile(name: String) -> Result<(), CliError> {
    let mut cfg = config::load_config_or_default();
    if !cfg.profiles.contains_key(&name) {
        return Err(profile_not_found(name, &cfg));
    }

    cfg.default_profile = Some(name.clone());
    config::save_config(&cfg)?;
    eprintln!("Default profile set to '{name}'");
    Ok(())
}

fn remove(name: &str) -> Result<(), CliError> {
    let mut cfg = config::load_config_or_default();
    if cfg.profiles.remove(name).is_none() {
        return Err(profile_not_found(name.to_owned(), &cfg));
    }

    if cfg.default_profile.as_deref() == Some(name) {
        cfg.default_profile = cfg.profiles.keys().next().cloned();
    }
    config::save_config(&cfg)?;

    if let Err(e) = CredentialStore::system().forget(name) {
        tracing::warn!(profile = name, error = %e, "could not remove keyring entry");
    }

    eprintln!("Removed profile '{name}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_masks_every_secret() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "depot".into(),
            Profile {
                username: Some("fleet".into()),
                password: Some("hunter2".into()),
                password_hash: Some("5f4dcc3b5aa765d61d8327deb882cf99".into()),
                ..Profile::default()
            },
        );

        let text = format_config(&cfg, &CredentialStore::isolated());
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("5f4dcc3b"));
        assert!(text.contains("password = \"****\""));
        assert!(text.contains("username = \"fleet\""));
        assert!(text.contains("# credentials: ready (config (hash))"));

        let masked = redacted(&cfg);
        let profile = &masked.profiles["depot"];
        assert_eq!(profile.password.as_deref(), Some(MASK));
        assert_eq!(profile.password_hash.as_deref(), Some(MASK));
    }

    #[test]
    fn status_comment_names_missing_fields() {
        let mut cfg = Config::default();
        cfg.profiles.insert("empty".into(), Profile::default());

        let text = format_config(&cfg, &CredentialStore::isolated());
        assert!(text.contains("# credentials: missing username, password"));
    }
}
