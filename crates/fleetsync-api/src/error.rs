use thiserror::Error;

/// Provider status signalling that the per-account request quota was exceeded.
pub const STATUS_RATE_LIMITED: i64 = 8902;

/// Provider statuses that mean the token is no longer accepted.
pub const STATUS_TOKEN_INVALID: &[i64] = &[9903, 9906];

/// Top-level error type for the `fleetsync-api` crate.
///
/// Keeps transport failures (the request never produced a usable answer)
/// apart from provider failures (a well-formed reply with a non-zero
/// `status`). `fleetsync-core` relies on that split when it reports
/// outcomes to the rate limiter.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected by the provider (wrong credentials, disabled account).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The provider no longer accepts the session token.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// A call that needs a token was made without one.
    #[error("Not authenticated")]
    NotAuthenticated,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success HTTP status from the API gateway.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // ── Provider ────────────────────────────────────────────────────
    /// The provider throttled this account (status 8902 or HTTP 429).
    #[error("Rate limited by provider (status {status}): {cause}")]
    RateLimited { status: i64, cause: String },

    /// Any other non-zero `status` in the reply payload.
    #[error("Provider error (status {status}): {cause}")]
    Provider { status: i64, cause: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::SessionExpired | Self::NotAuthenticated
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the provider asked us to back off.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns `true` if the request failed below the provider's
    /// application layer (network, TLS, gateway 5xx).
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } | Self::Tls(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The provider or HTTP status attached to this error, if any.
    pub fn status_code(&self) -> Option<i64> {
        match self {
            Self::RateLimited { status, .. } | Self::Provider { status, .. } => Some(*status),
            Self::Http { status, .. } => Some(i64::from(*status)),
            Self::Transport(e) => e.status().map(|s| i64::from(s.as_u16())),
            _ => None,
        }
    }

    /// Classify a non-zero provider status into the matching variant.
    pub(crate) fn from_status(status: i64, cause: String) -> Self {
        if status == STATUS_RATE_LIMITED {
            Self::RateLimited { status, cause }
        } else if STATUS_TOKEN_INVALID.contains(&status) {
            Self::SessionExpired
        } else {
            Self::Provider { status, cause }
        }
    }
}
