// ── Device and position fetcher ──
//
// Every provider call made after login goes through `Fetcher::call`:
// obtain a session, take a permit from the shared rate limiter, make
// the call, and report the outcome (with its response time) back to
// the limiter before returning. A rejected token drops the session so
// the next call logs in again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use fleetsync_api::{CommandReceipt, Gps51Client, Session};
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Device, Position};
use crate::rate_limit::{Outcome, RateLimiter};
use crate::session::{AuthState, SessionManager};

/// Positions returned by one `lastposition` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionFetch {
    /// At most one record per device: the one with the latest
    /// `update_time`.
    pub positions: Vec<Position>,
    /// The provider's cursor for the next incremental fetch.
    pub last_query_time: i64,
}

/// What the polling engine drives. [`Fetcher`] is the real provider;
/// tests substitute scripted sources.
pub trait FleetSource: Send + Sync {
    fn devices(&self) -> BoxFuture<'_, Result<Vec<Device>, CoreError>>;

    /// Positions newer than the source's cursor. The cursor only moves
    /// when the call succeeds.
    fn positions<'a>(
        &'a self,
        device_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Position>, CoreError>>;

    /// Re-establish provider authentication after it was lost.
    fn reconnect(&self) -> BoxFuture<'_, Result<(), CoreError>>;

    /// Authentication changes, if the source has any.
    fn auth_events(&self) -> Option<watch::Receiver<AuthState>> {
        None
    }
}

/// Keep only the latest record per device, by `update_time`.
///
/// On equal timestamps the record that arrived later wins. Output is
/// ordered by device id.
pub fn dedupe_latest(positions: impl IntoIterator<Item = Position>) -> Vec<Position> {
    let mut latest: HashMap<String, Position> = HashMap::new();
    for position in positions {
        match latest.get(&position.device_id) {
            Some(existing) if !position.supersedes(existing) => {}
            _ => {
                latest.insert(position.device_id.clone(), position);
            }
        }
    }
    let mut out: Vec<Position> = latest.into_values().collect();
    out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    out
}

/// Rate-limited access to the provider's device and position endpoints.
pub struct Fetcher {
    client: Gps51Client,
    limiter: Arc<RateLimiter>,
    sessions: Arc<SessionManager>,
    cursor: AtomicI64,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("base_url", &self.client.base_url().as_str())
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(
        client: Gps51Client,
        limiter: Arc<RateLimiter>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            client,
            limiter,
            sessions,
            cursor: AtomicI64::new(0),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The provider cursor for the next incremental fetch (`0` = full).
    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Force the next incremental fetch to be a full one.
    pub fn reset_cursor(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    // ── Endpoints ────────────────────────────────────────────────────

    pub async fn list_devices(&self) -> Result<Vec<Device>, CoreError> {
        let records = self
            .call("querymonitorlist", |session| async move {
                self.client.list_devices(&session).await
            })
            .await?;
        Ok(records.into_iter().map(Device::from).collect())
    }

    /// Fetch positions for `device_ids` newer than `since` (`0` = all).
    pub async fn fetch_positions(
        &self,
        device_ids: &[String],
        since: i64,
    ) -> Result<PositionFetch, CoreError> {
        let batch = self
            .call("lastposition", |session| async move {
                self.client.last_positions(&session, device_ids, since).await
            })
            .await?;
        Ok(PositionFetch {
            positions: dedupe_latest(batch.records.into_iter().map(Position::from)),
            last_query_time: batch.last_query_time,
        })
    }

    /// Fetch from the stored cursor and advance it to the provider's echo.
    pub async fn fetch_incremental(&self, device_ids: &[String]) -> Result<PositionFetch, CoreError> {
        let since = self.cursor();
        let fetch = self.fetch_positions(device_ids, since).await?;
        if fetch.last_query_time > 0 {
            self.cursor.store(fetch.last_query_time, Ordering::Release);
        }
        Ok(fetch)
    }

    /// Queue a command for a device (`setcommand`).
    pub async fn send_command(
        &self,
        device_id: &str,
        command: &str,
        params: &[String],
    ) -> Result<CommandReceipt, CoreError> {
        self.call("setcommand", |session| async move {
            self.client
                .send_command(&session, device_id, command, params)
                .await
        })
        .await
    }

    // ── Call wrapper ─────────────────────────────────────────────────

    async fn call<T, F, Fut>(&self, action: &'static str, op: F) -> Result<T, CoreError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, fleetsync_api::Error>>,
    {
        let session = self.sessions.ensure_session().await?;
        self.limiter.acquire().await?;

        let started = Instant::now();
        let result = op(session).await;
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                self.limiter.record_outcome(Outcome::Success, elapsed);
                debug!(action, elapsed_ms = elapsed.as_millis(), "provider call succeeded");
                Ok(value)
            }
            Err(e) => {
                let outcome = Outcome::from_error(&e);
                self.limiter.record_outcome(outcome, elapsed);
                debug!(action, ?outcome, error = %e, "provider call failed");
                if matches!(
                    e,
                    fleetsync_api::Error::SessionExpired | fleetsync_api::Error::NotAuthenticated
                ) {
                    self.sessions.invalidate();
                }
                Err(e.into())
            }
        }
    }
}

impl FleetSource for Fetcher {
    fn devices(&self) -> BoxFuture<'_, Result<Vec<Device>, CoreError>> {
        Box::pin(self.list_devices())
    }

    fn positions<'a>(
        &'a self,
        device_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Position>, CoreError>> {
        Box::pin(async move {
            if device_ids.is_empty() {
                return Ok(Vec::new());
            }
            Ok(self.fetch_incremental(device_ids).await?.positions)
        })
    }

    fn reconnect(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move { self.sessions.ensure_session().await.map(|_| ()) })
    }

    fn auth_events(&self) -> Option<watch::Receiver<AuthState>> {
        Some(self.sessions.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Telemetry;
    use pretty_assertions::assert_eq;

    fn position(id: &str, update_time: i64) -> Position {
        Position {
            device_id: id.into(),
            latitude: 0.0,
            longitude: 0.0,
            speed: 0.0,
            heading: 0.0,
            moving: false,
            update_time,
            telemetry: Telemetry::default(),
        }
    }

    #[test]
    fn dedupe_keeps_max_update_time_per_device() {
        let batch = vec![
            position("A", 100),
            position("B", 50),
            position("A", 300),
            position("A", 200),
        ];
        let latest: Vec<_> = dedupe_latest(batch)
            .into_iter()
            .map(|p| (p.device_id, p.update_time))
            .collect();
        assert_eq!(latest, vec![("A".to_string(), 300), ("B".to_string(), 50)]);
    }

    #[test]
    fn dedupe_of_empty_batch_is_empty() {
        assert!(dedupe_latest(Vec::new()).is_empty());
    }
}
