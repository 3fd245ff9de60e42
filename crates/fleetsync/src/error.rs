//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use fleetsync_config::ConfigError;
use fleetsync_core::{CoreError, DegradationLevel, Feature};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const DEGRADED: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the provider at {url}: {reason}")]
    #[diagnostic(
        code(fleetsync::connection_failed),
        help(
            "Check network access to the API endpoint.\n\
             URL: {url}\n\
             Override it with --api-url or `api_url` in your profile."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(fleetsync::timeout),
        help("Increase the timeout with --timeout or retry later.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(fleetsync::auth_failed),
        help(
            "Verify the username and password for profile '{profile}'.\n\
             Run: fleetsync config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("Profile '{profile}' is missing: {missing}")]
    #[diagnostic(
        code(fleetsync::no_credentials),
        help(
            "Configure the profile with: fleetsync config init\n\
             Or set FLEETSYNC_USERNAME and FLEETSYNC_PASSWORD."
        )
    )]
    NoCredentials { profile: String, missing: String },

    // ── Provider ─────────────────────────────────────────────────────
    #[error("Provider rejected the request (status {status}): {cause}")]
    #[diagnostic(code(fleetsync::provider))]
    Provider { status: i64, cause: String },

    #[error("Provider calls are on hold: {reason}")]
    #[diagnostic(
        code(fleetsync::throttled),
        help("The account hit a rate limit or failed repeatedly. Retry in {retry_secs}s.")
    )]
    Throttled { reason: String, retry_secs: u64 },

    #[error("'{feature}' is unavailable while service is {level}")]
    #[diagnostic(
        code(fleetsync::degraded),
        help("Dependent services are failing. Run `fleetsync watch -v` to see health checks.")
    )]
    Degraded {
        feature: Feature,
        level: DegradationLevel,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fleetsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(fleetsync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: fleetsync config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(fleetsync::config))]
    Config { message: String },

    #[error("Keyring error: {0}")]
    #[diagnostic(
        code(fleetsync::keyring),
        help("Store the hash in the profile instead: `password_hash` in config.toml.")
    )]
    Keyring(String),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(fleetsync::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Throttled { .. } | Self::Degraded { .. } => exit_code::DEGRADED,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Name the profile in authentication errors raised below the CLI.
    pub fn for_profile(self, name: &str) -> Self {
        match self {
            Self::AuthFailed { message, .. } => Self::AuthFailed {
                profile: name.into(),
                message,
            },
            other => other,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration { message } => CliError::Config { message },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                profile: "current".into(),
                message,
            },
            CoreError::SessionLost => CliError::AuthFailed {
                profile: "current".into(),
                message: "session expired and could not be renewed".into(),
            },
            CoreError::Transport { reason, .. } => CliError::ConnectionFailed {
                url: "the configured API".into(),
                reason,
            },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::ProviderRateLimited { status, cause } => CliError::Throttled {
                reason: format!("provider rate limit (status {status}): {cause}"),
                retry_secs: 600,
            },
            CoreError::Provider { status, cause } => CliError::Provider { status, cause },
            CoreError::Throttled { reason, wait } => CliError::Throttled {
                reason: reason.to_string(),
                retry_secs: wait.as_secs().max(1),
            },
            CoreError::FeatureUnavailable { feature, level } => {
                CliError::Degraded { feature, level }
            }
            CoreError::Storage { message } | CoreError::Internal(message) => {
                CliError::Internal(message)
            }
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile, missing } => CliError::NoCredentials {
                profile,
                missing: missing.join(", "),
            },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: "(see `fleetsync config show`)".into(),
            },
            ConfigError::KeyringDisabled => CliError::Keyring("keyring is disabled".into()),
            ConfigError::Keyring(e) => CliError::Keyring(e.to_string()),
            ConfigError::Io(e) => CliError::Io(e),
            other @ (ConfigError::Serialization(_) | ConfigError::Figment(_)) => {
                CliError::Config {
                    message: other.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fleetsync_core::DenyReason;

    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let auth: CliError = CoreError::AuthenticationFailed {
            message: "bad password".into(),
        }
        .into();
        assert_eq!(auth.exit_code(), exit_code::AUTH);

        let held: CliError = CoreError::Throttled {
            reason: DenyReason::CircuitBreakerOpen,
            wait: Duration::from_secs(90),
        }
        .into();
        assert_eq!(held.exit_code(), exit_code::DEGRADED);

        let gated: CliError = CoreError::FeatureUnavailable {
            feature: Feature::DeviceCommands,
            level: DegradationLevel::Limited,
        }
        .into();
        assert_eq!(gated.exit_code(), exit_code::DEGRADED);

        let missing: CliError = ConfigError::NoCredentials {
            profile: "default".into(),
            missing: vec!["username", "password"],
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::AUTH);
        assert_eq!(
            missing.to_string(),
            "Profile 'default' is missing: username, password"
        );
    }
}
