// ── Core error types ──
//
// User-facing errors from fleetsync-core. Consumers never see reqwest
// errors or JSON parse failures directly; the `From<fleetsync_api::Error>`
// impl translates transport-layer errors into the sync taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::degradation::{DegradationLevel, Feature};
use crate::rate_limit::DenyReason;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Setup ────────────────────────────────────────────────────────
    /// Missing or incomplete credentials. Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The provider no longer accepts the session token. Cleared by
    /// logging in again.
    #[error("Provider session expired -- re-authentication required")]
    SessionLost,

    // ── Transport ────────────────────────────────────────────────────
    #[error("Cannot reach provider: {reason}")]
    Transport { reason: String, status: Option<u16> },

    #[error("Provider request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Provider ─────────────────────────────────────────────────────
    /// The provider throttled the account; no retry until the cooldown ends.
    #[error("Provider rate limit hit (status {status}): {cause}")]
    ProviderRateLimited { status: i64, cause: String },

    #[error("Provider rejected the request (status {status}): {cause}")]
    Provider { status: i64, cause: String },

    // ── Local gating ─────────────────────────────────────────────────
    /// The shared rate limiter refused the call.
    #[error("Request throttled ({reason}); retry in {}s", wait.as_secs())]
    Throttled { reason: DenyReason, wait: Duration },

    #[error("Feature '{feature}' is unavailable at degradation level '{level}'")]
    FeatureUnavailable {
        feature: Feature,
        level: DegradationLevel,
    },

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Storage error: {message}")]
    Storage { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors that should route the user to setup rather than be retried.
    pub fn needs_setup(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::AuthenticationFailed { .. }
        )
    }

    /// Errors that leave the service usable after a later retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::Throttled { .. }
                | Self::SessionLost
        )
    }

    /// Errors meaning the provider is being held off (cooldown or open circuit).
    pub fn is_service_degraded(&self) -> bool {
        match self {
            Self::ProviderRateLimited { .. } | Self::FeatureUnavailable { .. } => true,
            Self::Throttled { reason, .. } => !matches!(reason, DenyReason::MinSpacing),
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<fleetsync_api::Error> for CoreError {
    fn from(err: fleetsync_api::Error) -> Self {
        use fleetsync_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::SessionExpired | Api::NotAuthenticated => CoreError::SessionLost,
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else {
                    CoreError::Transport {
                        reason: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Configuration {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(msg) => CoreError::Transport {
                reason: format!("TLS error: {msg}"),
                status: None,
            },
            Api::Http { status, body } => CoreError::Transport {
                reason: if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {body}")
                },
                status: Some(status),
            },
            Api::RateLimited { status, cause } => CoreError::ProviderRateLimited { status, cause },
            Api::Provider { status, cause } => CoreError::Provider { status, cause },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_taxonomy() {
        let err: CoreError = fleetsync_api::Error::RateLimited {
            status: 8902,
            cause: "slow down".into(),
        }
        .into();
        assert!(matches!(err, CoreError::ProviderRateLimited { status: 8902, .. }));
        assert!(err.is_service_degraded());

        let err: CoreError = fleetsync_api::Error::Authentication {
            message: "bad password".into(),
        }
        .into();
        assert!(err.needs_setup());

        let err: CoreError = fleetsync_api::Error::SessionExpired.into();
        assert!(!err.needs_setup());
        assert!(err.is_transient());

        let err: CoreError = fleetsync_api::Error::Http {
            status: 500,
            body: String::new(),
        }
        .into();
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Cannot reach provider: HTTP 500");
    }

    #[test]
    fn spacing_denial_is_not_degraded() {
        let spacing = CoreError::Throttled {
            reason: DenyReason::MinSpacing,
            wait: Duration::from_secs(2),
        };
        assert!(!spacing.is_service_degraded());

        let circuit = CoreError::Throttled {
            reason: DenyReason::CircuitBreakerOpen,
            wait: Duration::from_secs(60),
        };
        assert!(circuit.is_service_degraded());
    }
}
