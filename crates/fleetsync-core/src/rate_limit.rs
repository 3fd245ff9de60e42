// ── Provider rate limiter and circuit breaker ──
//
// The provider enforces a single per-account limit no matter which
// internal caller issues a request, so there is exactly one gate: every
// caller shares one `Arc<RateLimiter>` and all state changes happen
// inside one mutex-guarded critical section.
//
// State machine:
//
//   Closed --[N consecutive severe failures]--> Open
//   Open   --[recovery window elapsed]------> Closed (failures reset)
//
// A non-severe failure breaks a severe streak. A rejected token is
// neither success nor failure: it leaves every counter untouched.
//
// Cooldowns (provider rate-limit signal, failure-rate threshold) reject
// calls independently of the circuit until they expire.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RateLimitPolicy;
use crate::degradation::HealthProbe;
use crate::error::CoreError;

/// Why a call was refused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DenyReason {
    CircuitBreakerOpen,
    RateLimitCooldown,
    MinSpacing,
}

/// Result of [`RateLimiter::check_allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    /// How long the caller must wait before asking again.
    pub wait: Duration,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            wait: Duration::ZERO,
        }
    }

    fn deny(reason: DenyReason, wait: Duration) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            wait,
        }
    }
}

/// Outcome of a provider call, as reported back to the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum Outcome {
    Success,
    /// Connection, TLS, timeout or unreadable reply.
    Transport,
    /// Non-2xx HTTP status.
    Http(u16),
    /// Provider rate-limit status (8902) or HTTP 429.
    ProviderRateLimited,
    /// The provider no longer accepts the session token.
    TokenRejected,
    /// Any other non-zero provider status.
    ProviderError(i64),
}

impl Outcome {
    /// Classify a transport-layer error.
    pub fn from_error(err: &fleetsync_api::Error) -> Self {
        use fleetsync_api::Error as Api;

        match err {
            Api::RateLimited { .. } => Self::ProviderRateLimited,
            Api::SessionExpired | Api::NotAuthenticated => Self::TokenRejected,
            Api::Http { status, .. } => Self::Http(*status),
            Api::Transport(_) | Api::Timeout { .. } | Api::Tls(_) | Api::Deserialization { .. } => {
                Self::Transport
            }
            other => Self::ProviderError(other.status_code().unwrap_or(-1)),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Failures that count toward the failure-rate window.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success | Self::TokenRejected)
    }

    /// Failures that count toward opening the circuit.
    pub fn is_severe(self) -> bool {
        match self {
            Self::Transport | Self::ProviderRateLimited => true,
            Self::Http(status) => status >= 500,
            Self::Success | Self::TokenRejected | Self::ProviderError(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RequestRecord {
    at: Instant,
    outcome: Outcome,
    response_time: Duration,
}

#[derive(Debug, Default)]
struct RateLimitState {
    last_request: Option<Instant>,
    consecutive_failures: u32,
    consecutive_severe: u32,
    cooldown_until: Option<Instant>,
    circuit_opened_at: Option<Instant>,
    last_rate_limit: Option<Instant>,
    history: VecDeque<RequestRecord>,
}

/// Point-in-time view of the limiter for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub consecutive_failures: u32,
    pub consecutive_severe: u32,
    pub circuit_open: bool,
    /// Remaining time until the circuit closes, if open.
    pub circuit_retry_in: Option<Duration>,
    /// Remaining cooldown, if one is active.
    pub cooldown_remaining: Option<Duration>,
    pub recorded_requests: usize,
    pub recent_failures: usize,
    pub average_response_time: Option<Duration>,
}

/// The single shared gate in front of every provider call.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    state: Mutex<RateLimitState>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RateLimitState::default()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Ask permission for a call now. A granted call counts as issued.
    pub fn check_allowed(&self) -> Decision {
        self.check_allowed_at(Instant::now())
    }

    /// Ask permission for a call at `now`.
    ///
    /// Checks run in order: open circuit, active cooldown, minimum
    /// spacing. The first that applies wins.
    pub fn check_allowed_at(&self, now: Instant) -> Decision {
        let mut state = self.lock();

        if let Some(opened) = state.circuit_opened_at {
            let closes_at = opened + self.policy.circuit_recovery;
            if now < closes_at {
                return Decision::deny(DenyReason::CircuitBreakerOpen, closes_at - now);
            }
            info!("circuit breaker closed after recovery window");
            state.circuit_opened_at = None;
            state.consecutive_failures = 0;
            state.consecutive_severe = 0;
        }

        if let Some(until) = state.cooldown_until {
            if now < until {
                return Decision::deny(DenyReason::RateLimitCooldown, until - now);
            }
            debug!("cooldown expired");
            state.cooldown_until = None;
        }

        if let Some(last) = state.last_request {
            let next = last + self.policy.min_spacing;
            if now < next {
                return Decision::deny(DenyReason::MinSpacing, next - now);
            }
        }

        state.last_request = Some(now);
        Decision::allow()
    }

    /// Wait out a spacing denial, then take the permit.
    ///
    /// Cooldown and open-circuit denials are not waited for; they come
    /// back as [`CoreError::Throttled`] carrying the remaining wait.
    pub async fn acquire(&self) -> Result<(), CoreError> {
        loop {
            let decision = self.check_allowed();
            match decision.reason {
                None => return Ok(()),
                Some(DenyReason::MinSpacing) => {
                    debug!(wait_ms = decision.wait.as_millis(), "spacing provider call");
                    tokio::time::sleep(decision.wait).await;
                }
                Some(reason) => {
                    return Err(CoreError::Throttled {
                        reason,
                        wait: decision.wait,
                    });
                }
            }
        }
    }

    /// Report how a granted call ended.
    pub fn record_outcome(&self, outcome: Outcome, response_time: Duration) {
        self.record_outcome_at(outcome, response_time, Instant::now());
    }

    pub fn record_outcome_at(&self, outcome: Outcome, response_time: Duration, now: Instant) {
        let mut state = self.lock();

        if state.history.len() >= self.policy.history_capacity.max(1) {
            state.history.pop_front();
        }
        state.history.push_back(RequestRecord {
            at: now,
            outcome,
            response_time,
        });

        if outcome.is_success() {
            state.consecutive_failures = 0;
            state.consecutive_severe = 0;
            return;
        }
        if !outcome.is_failure() {
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_severe = if outcome.is_severe() {
            state.consecutive_severe.saturating_add(1)
        } else {
            0
        };

        if matches!(outcome, Outcome::ProviderRateLimited) {
            let repeated = state
                .last_rate_limit
                .is_some_and(|at| now.saturating_duration_since(at) <= self.policy.failure_window);
            let cooldown = if repeated {
                self.policy.escalated_cooldown
            } else {
                self.policy.rate_limit_cooldown
            };
            state.last_rate_limit = Some(now);
            extend_cooldown(&mut state, now + cooldown);
            warn!(
                cooldown_secs = cooldown.as_secs(),
                repeated, "provider rate limit hit, cooling down"
            );
        }

        let window_start = now.checked_sub(self.policy.failure_window);
        let recent_failures = state
            .history
            .iter()
            .filter(|r| r.outcome.is_failure() && window_start.is_none_or(|start| r.at >= start))
            .count();
        if recent_failures > self.policy.failure_threshold {
            extend_cooldown(&mut state, now + self.policy.failure_cooldown);
            warn!(
                recent_failures,
                cooldown_secs = self.policy.failure_cooldown.as_secs(),
                "failure rate exceeded, cooling down"
            );
        }

        if state.consecutive_severe >= self.policy.circuit_threshold
            && state.circuit_opened_at.is_none()
        {
            state.circuit_opened_at = Some(now);
            warn!(
                consecutive_severe = state.consecutive_severe,
                recovery_secs = self.policy.circuit_recovery.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    /// Impose a cooldown of `duration` from now (operator action).
    pub fn impose_cooldown(&self, duration: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        extend_cooldown(&mut state, now + duration);
    }

    /// Clear all state: close the circuit, lift cooldowns, forget history.
    pub fn reset(&self) {
        info!("rate limiter reset");
        *self.lock() = RateLimitState::default();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn consecutive_severe(&self) -> u32 {
        self.lock().consecutive_severe
    }

    /// `false` while the circuit is open or a cooldown is active.
    pub fn is_healthy(&self) -> bool {
        self.is_healthy_at(Instant::now())
    }

    pub fn is_healthy_at(&self, now: Instant) -> bool {
        let state = self.lock();
        let circuit_open = state
            .circuit_opened_at
            .is_some_and(|opened| now < opened + self.policy.circuit_recovery);
        let cooling = state.cooldown_until.is_some_and(|until| now < until);
        !circuit_open && !cooling
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> RateLimitSnapshot {
        let state = self.lock();
        let circuit_retry_in = state
            .circuit_opened_at
            .map(|opened| (opened + self.policy.circuit_recovery).saturating_duration_since(now))
            .filter(|d| !d.is_zero());
        let cooldown_remaining = state
            .cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .filter(|d| !d.is_zero());

        let window_start = now.checked_sub(self.policy.failure_window);
        let recent_failures = state
            .history
            .iter()
            .filter(|r| r.outcome.is_failure() && window_start.is_none_or(|start| r.at >= start))
            .count();

        let average_response_time = if state.history.is_empty() {
            None
        } else {
            let total: Duration = state.history.iter().map(|r| r.response_time).sum();
            let count = u32::try_from(state.history.len()).unwrap_or(u32::MAX);
            Some(total / count)
        };

        RateLimitSnapshot {
            consecutive_failures: state.consecutive_failures,
            consecutive_severe: state.consecutive_severe,
            circuit_open: circuit_retry_in.is_some(),
            circuit_retry_in,
            cooldown_remaining,
            recorded_requests: state.history.len(),
            recent_failures,
            average_response_time,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateLimitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn extend_cooldown(state: &mut RateLimitState, until: Instant) {
    if state.cooldown_until.is_none_or(|current| current < until) {
        state.cooldown_until = Some(until);
    }
}

/// The limiter doubles as the provider's health probe: the provider is
/// unhealthy while calls to it are being held off.
impl HealthProbe for RateLimiter {
    fn check(&self) -> BoxFuture<'_, bool> {
        Box::pin(future::ready(self.is_healthy()))
    }
}
