//! Shared configuration for FleetSync tools.
//!
//! TOML profiles, credential resolution (env + keyring + config file),
//! and translation to `fleetsync_core::SyncConfig`. The CLI layers its
//! `GlobalOpts` overrides on top of what this crate resolves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fleetsync_core::{AccountType, Credentials, Password, PasswordHash, SyncConfig, TlsVerification};

/// Keyring service name; entries are `{profile}/password-hash`.
pub const KEYRING_SERVICE: &str = "fleetsync";

/// Plaintext password override, highest precedence in the chain.
pub const PASSWORD_ENV: &str = "FLEETSYNC_PASSWORD";

pub const DEFAULT_API_URL: &str = "https://api.gps51.com/openapi";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' is missing: {}", missing.join(", "))]
    NoCredentials {
        profile: String,
        missing: Vec<&'static str>,
    },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("keyring storage is disabled for this credential store")]
    KeyringDisabled,

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named provider accounts.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// The profile to use: the explicit name, else `default_profile`,
    /// else `"default"`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Base polling interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    30
}

/// A named GPS51 account.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Provider endpoint (e.g. "https://api.gps51.com/openapi").
    #[serde(default = "default_api_url")]
    pub api_url: String,

    pub username: Option<String>,

    /// Plaintext password (prefer the keyring).
    pub password: Option<String>,

    /// MD5 hex digest of the password.
    pub password_hash: Option<String>,

    /// The `from` tag sent with the login.
    #[serde(default = "default_origin")]
    pub origin: String,

    #[serde(default)]
    pub account_type: AccountType,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,

    pub timeout: Option<u64>,

    /// Base polling interval in seconds.
    pub poll_interval: Option<u64>,

    /// Schedule polls from vehicle activity instead of the fixed interval.
    pub adaptive: Option<bool>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            username: None,
            password: None,
            password_hash: None,
            origin: default_origin(),
            account_type: AccountType::default(),
            ca_cert: None,
            insecure: None,
            timeout: None,
            poll_interval: None,
            adaptive: None,
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_origin() -> String {
    "WEB".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "fleetsync", "fleetsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fleetsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, then `FLEETSYNC_*` env vars (`__` separates nested
/// keys, e.g. `FLEETSYNC_DEFAULTS__TIMEOUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FLEETSYNC_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if the file is missing or unreadable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential store ────────────────────────────────────────────────

/// Where a resolved password came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    Keyring,
    ConfigHash,
    ConfigPlaintext,
}

impl CredentialSource {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Keyring => "keyring",
            Self::ConfigHash => "config (hash)",
            Self::ConfigPlaintext => "config (plaintext)",
        }
    }
}

/// Whether a profile has everything needed to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Configured { source: CredentialSource },
    NotConfigured { missing: Vec<&'static str> },
}

impl CredentialStatus {
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured { .. })
    }
}

/// Resolves and stores provider passwords.
///
/// Lookup order: `FLEETSYNC_PASSWORD` → keyring hash → profile
/// `password_hash` → profile `password`. Secrets written by the store
/// are always MD5 hashes, never plaintext.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    keyring_service: Option<String>,
    env_password: Option<SecretString>,
}

impl CredentialStore {
    /// The store used by the binaries: system keyring plus the process
    /// environment.
    pub fn system() -> Self {
        Self {
            keyring_service: Some(KEYRING_SERVICE.into()),
            env_password: std::env::var(PASSWORD_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .map(SecretString::from),
        }
    }

    /// No keyring, no environment: only what the profile holds.
    pub fn isolated() -> Self {
        Self::default()
    }

    /// Override the environment password.
    pub fn with_env_password(mut self, password: SecretString) -> Self {
        self.env_password = Some(password);
        self
    }

    fn entry(&self, profile_name: &str) -> Result<keyring::Entry, ConfigError> {
        let service = self
            .keyring_service
            .as_deref()
            .ok_or(ConfigError::KeyringDisabled)?;
        Ok(keyring::Entry::new(
            service,
            &format!("{profile_name}/password-hash"),
        )?)
    }

    /// Hash stored in the keyring for `profile_name`, if any.
    pub fn keyring_hash(&self, profile_name: &str) -> Option<String> {
        self.entry(profile_name).ok()?.get_password().ok()
    }

    /// Store the hash of a password in the keyring.
    pub fn store_hash(&self, profile_name: &str, hash: &PasswordHash) -> Result<(), ConfigError> {
        self.entry(profile_name)?.set_password(hash.as_str())?;
        debug!(profile = profile_name, "stored password hash in keyring");
        Ok(())
    }

    /// Remove the keyring entry. Missing entries are not an error.
    pub fn forget(&self, profile_name: &str) -> Result<(), ConfigError> {
        match self.entry(profile_name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the password for `profile` along the lookup chain.
    pub fn resolve_password(
        &self,
        profile: &Profile,
        profile_name: &str,
    ) -> Result<(Password, CredentialSource), ConfigError> {
        if let Some(ref pw) = self.env_password {
            return Ok((Password::Plain(pw.clone()), CredentialSource::Environment));
        }

        if let Some(stored) = self.keyring_hash(profile_name) {
            let hash = parse_hash("keyring password hash", &stored)?;
            return Ok((Password::Hashed(hash), CredentialSource::Keyring));
        }

        if let Some(ref stored) = profile.password_hash {
            let hash = parse_hash("password_hash", stored)?;
            return Ok((Password::Hashed(hash), CredentialSource::ConfigHash));
        }

        if let Some(ref pw) = profile.password {
            if !pw.is_empty() {
                return Ok((
                    Password::Plain(SecretString::from(pw.clone())),
                    CredentialSource::ConfigPlaintext,
                ));
            }
        }

        Err(ConfigError::NoCredentials {
            profile: profile_name.into(),
            missing: vec!["password"],
        })
    }

    /// Username plus resolved password, with the profile's login tags.
    pub fn resolve_credentials(
        &self,
        profile: &Profile,
        profile_name: &str,
    ) -> Result<Credentials, ConfigError> {
        let username = profile
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::NoCredentials {
                profile: profile_name.into(),
                missing: vec!["username"],
            })?;
        let (password, _) = self.resolve_password(profile, profile_name)?;

        let mut credentials = Credentials::new(username, password);
        credentials.origin.clone_from(&profile.origin);
        credentials.account_type = profile.account_type;
        Ok(credentials)
    }

    /// Report what, if anything, the profile still needs.
    pub fn status(&self, profile: &Profile, profile_name: &str) -> CredentialStatus {
        let mut missing = Vec::new();
        if url::Url::parse(&profile.api_url).is_err() {
            missing.push("api_url");
        }
        if profile.username.as_deref().is_none_or(|u| u.trim().is_empty()) {
            missing.push("username");
        }
        let source = match self.resolve_password(profile, profile_name) {
            Ok((_, source)) => Some(source),
            Err(_) => {
                missing.push("password");
                None
            }
        };

        match source {
            Some(source) if missing.is_empty() => CredentialStatus::Configured { source },
            _ => CredentialStatus::NotConfigured { missing },
        }
    }
}

fn parse_hash(field: &str, value: &str) -> Result<PasswordHash, ConfigError> {
    PasswordHash::from_hex(value).map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: "expected a 32-character hex MD5 digest".into(),
    })
}

// ── SyncConfig translation ──────────────────────────────────────────

/// Build a `SyncConfig` from a profile, with no CLI overrides.
pub fn profile_to_sync_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    store: &CredentialStore,
) -> Result<SyncConfig, ConfigError> {
    let url: url::Url = profile
        .api_url
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "api_url".into(),
            reason: format!("invalid URL: {}", profile.api_url),
        })?;

    let credentials = store.resolve_credentials(profile, profile_name)?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = SyncConfig::new(url, credentials);
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.polling.base_interval =
        Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval).max(1));
    config.polling.adaptive_scheduling = profile.adaptive.unwrap_or(false);
    Ok(config)
}
