// ── Runtime sync configuration ──
//
// These types describe *how* to talk to the provider and how the sync
// core paces itself. They carry credential data and tuning, but never
// touch disk. The CLI constructs a `SyncConfig` and hands it in.

use std::time::Duration;

use fleetsync_api::Credentials;
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification.
    DangerAcceptInvalid,
}

/// Polling cadence and adaptive-interval tuning.
#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// Period of the single shared timer.
    pub base_interval: Duration,
    /// Interval for vehicles currently moving.
    pub min_interval: Duration,
    /// Upper bound for the stationary back-off.
    pub max_interval: Duration,
    /// Speed above which a vehicle flagged as moving counts as moving.
    pub moving_speed_threshold: f64,
    /// How long a vehicle must be stationary before its interval grows.
    pub stationary_threshold: Duration,
    /// Growth per consecutive stationary observation.
    pub stationary_growth: f64,
    /// A position older than this marks the vehicle offline.
    pub recency_window: Duration,
    /// Re-list devices every N cycles (the first cycle always lists).
    pub device_refresh_every: u32,
    /// Drive the timer from the fleet's adaptive intervals instead of
    /// the fixed base interval.
    pub adaptive_scheduling: bool,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(120),
            moving_speed_threshold: 5.0,
            stationary_threshold: Duration::from_secs(600),
            stationary_growth: 0.5,
            recency_window: Duration::from_secs(300),
            device_refresh_every: 10,
            adaptive_scheduling: false,
        }
    }
}

/// Spacing, cooldown and circuit-breaker thresholds for provider calls.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub min_spacing: Duration,
    /// Cooldown after a provider rate-limit signal.
    pub rate_limit_cooldown: Duration,
    /// Cooldown after a repeated rate-limit signal inside the failure window.
    pub escalated_cooldown: Duration,
    pub failure_window: Duration,
    /// Failures inside the window beyond which a cooldown is imposed.
    pub failure_threshold: usize,
    pub failure_cooldown: Duration,
    /// Consecutive severe failures that open the circuit.
    pub circuit_threshold: u32,
    pub circuit_recovery: Duration,
    pub history_capacity: usize,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_secs(3),
            rate_limit_cooldown: Duration::from_secs(10 * 60),
            escalated_cooldown: Duration::from_secs(15 * 60),
            failure_window: Duration::from_secs(15 * 60),
            failure_threshold: 10,
            failure_cooldown: Duration::from_secs(10 * 60),
            circuit_threshold: 3,
            circuit_recovery: Duration::from_secs(5 * 60),
            history_capacity: 100,
        }
    }
}

impl RateLimitPolicy {
    /// A policy with no spacing; useful for scripted one-shot runs and tests.
    pub fn unthrottled() -> Self {
        Self {
            min_spacing: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Health-check cadence and cache freshness for the degradation controller.
#[derive(Debug, Clone)]
pub struct DegradationPolicy {
    pub health_interval: Duration,
    pub cache_ttl: Duration,
    pub history_capacity: usize,
}

impl Default for DegradationPolicy {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(5 * 60),
            history_capacity: 20,
        }
    }
}

/// Configuration for syncing a single provider account.
///
/// Built by the CLI, passed to `FleetSync` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// API endpoint (e.g. `https://api.gps51.com/openapi`).
    pub url: Url,
    pub credentials: Credentials,
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// Local lifetime assumed for a session token.
    pub session_ttl: Duration,
    /// Login attempts made by one re-authentication.
    pub reauth_attempts: u32,
    pub polling: PollingOptions,
    pub rate_limit: RateLimitPolicy,
    pub degradation: DegradationPolicy,
}

impl SyncConfig {
    pub fn new(url: Url, credentials: Credentials) -> Self {
        Self {
            url,
            credentials,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            reauth_attempts: 3,
            polling: PollingOptions::default(),
            rate_limit: RateLimitPolicy::default(),
            degradation: DegradationPolicy::default(),
        }
    }
}
