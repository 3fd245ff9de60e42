// ── Authentication client and session manager ──
//
// Holds the single current provider session. Logins pass through the
// shared rate limiter like every other provider call, and re-logins
// are serialized so concurrent callers never produce overlapping
// tokens.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use fleetsync_api::{Credentials, Gps51Client, Session};
use futures_util::future::{self, BoxFuture};
use serde::Serialize;
use strum::Display;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::degradation::HealthProbe;
use crate::error::CoreError;
use crate::rate_limit::{Outcome, RateLimiter};

/// Authentication state as seen by the rest of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    /// The provider rejected the current token. Cleared by the next
    /// successful login.
    Lost,
}

pub struct SessionManager {
    client: Gps51Client,
    credentials: Credentials,
    limiter: Arc<RateLimiter>,
    session_ttl: Duration,
    reauth_attempts: u32,
    current: ArcSwapOption<Session>,
    state: watch::Sender<AuthState>,
    credentials_rejected: AtomicBool,
    login_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("username", &self.credentials.username)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        client: Gps51Client,
        credentials: Credentials,
        limiter: Arc<RateLimiter>,
        session_ttl: Duration,
        reauth_attempts: u32,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            client,
            credentials,
            limiter,
            session_ttl,
            reauth_attempts: reauth_attempts.max(1),
            current: ArcSwapOption::empty(),
            state,
            credentials_rejected: AtomicBool::new(false),
            login_lock: Mutex::new(()),
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn auth_state(&self) -> AuthState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// The current session, if one is held and not expired.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.current.load_full().filter(|s| !s.is_expired())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    /// Log in and make the new session current.
    ///
    /// One attempt, no retries. Empty credentials fail with
    /// [`CoreError::Configuration`] before any provider call.
    pub async fn authenticate(&self) -> Result<Arc<Session>, CoreError> {
        let _guard = self.login_lock.lock().await;
        self.login_once().await
    }

    /// Return the current session, logging in again if it is missing
    /// or expired. Transport failures are retried up to the configured
    /// attempt bound.
    pub async fn ensure_session(&self) -> Result<Arc<Session>, CoreError> {
        if let Some(session) = self.session() {
            return Ok(session);
        }

        let _guard = self.login_lock.lock().await;
        // Another caller may have logged in while we waited.
        if let Some(session) = self.session() {
            return Ok(session);
        }

        let mut attempt = 1;
        loop {
            match self.login_once().await {
                Ok(session) => return Ok(session),
                Err(e) if attempt < self.reauth_attempts && retryable(&e) => {
                    warn!(attempt, error = %e, "re-authentication failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop the current session after the provider rejected its token.
    pub fn invalidate(&self) {
        if self.current.swap(None).is_some() {
            warn!("session rejected by provider, re-authentication required");
        }
        self.state.send_replace(AuthState::Lost);
    }

    /// End the session. The provider-side logout is best effort and is
    /// skipped when the rate limiter would refuse it.
    pub async fn logout(&self) {
        if let Some(session) = self.current.swap(None) {
            if self.limiter.check_allowed().allowed {
                let started = Instant::now();
                let result = self.client.logout(&session).await;
                let outcome = result.as_ref().map_or_else(Outcome::from_error, |_| Outcome::Success);
                self.limiter.record_outcome(outcome, started.elapsed());
                if let Err(e) = result {
                    warn!(error = %e, "logout failed (non-fatal)");
                }
            } else {
                debug!("skipping provider logout while throttled");
            }
        }
        self.state.send_replace(AuthState::Unauthenticated);
    }

    async fn login_once(&self) -> Result<Arc<Session>, CoreError> {
        if self.credentials.username.trim().is_empty() || self.credentials.password.is_empty() {
            return Err(CoreError::Configuration {
                message: "provider username and password are required".into(),
            });
        }

        self.limiter.acquire().await?;

        let ttl = chrono::Duration::from_std(self.session_ttl).ok();
        let started = Instant::now();
        let result = self.client.login(&self.credentials, ttl).await;
        let elapsed = started.elapsed();

        match result {
            Ok(session) => {
                self.limiter.record_outcome(Outcome::Success, elapsed);
                let session = Arc::new(session);
                self.current.store(Some(Arc::clone(&session)));
                self.credentials_rejected.store(false, Ordering::Relaxed);
                self.state.send_replace(AuthState::Authenticated);
                info!(username = %self.credentials.username, "authenticated with provider");
                Ok(session)
            }
            Err(e) => {
                self.limiter.record_outcome(Outcome::from_error(&e), elapsed);
                if matches!(e, fleetsync_api::Error::Authentication { .. }) {
                    self.credentials_rejected.store(true, Ordering::Relaxed);
                    self.current.store(None);
                    self.state.send_replace(AuthState::Unauthenticated);
                }
                Err(e.into())
            }
        }
    }
}

fn retryable(err: &CoreError) -> bool {
    matches!(err, CoreError::Transport { .. } | CoreError::Timeout { .. })
}

/// Authentication health: unhealthy once the provider has rejected the
/// stored credentials, until a login succeeds.
impl HealthProbe for SessionManager {
    fn check(&self) -> BoxFuture<'_, bool> {
        Box::pin(future::ready(
            !self.credentials_rejected.load(Ordering::Relaxed),
        ))
    }
}
