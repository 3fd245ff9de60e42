// ── Graceful degradation controller ──
//
// Periodically probes the services the sync core depends on, folds
// their health into a weighted score, and derives a degradation level
// that gates which features may run. Gated operations go through
// `execute_with_degradation`, which substitutes cached or registered
// fallback data when an operation is refused or fails.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DegradationPolicy;
use crate::error::CoreError;

// ── Levels and features ──────────────────────────────────────────────

/// Operating mode. Ordered from most to least restricted, so
/// `Full > Limited > Offline > Emergency`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DegradationLevel {
    Emergency,
    Offline,
    Limited,
    Full,
}

/// Named capabilities gated by the degradation level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    LiveTracking,
    FleetOverview,
    PositionHistory,
    DeviceCommands,
    Alerts,
    Reports,
    CachedData,
}

impl DegradationLevel {
    /// Level for a weighted health score. A failing authentication
    /// service forces `Emergency` whatever the score.
    pub fn from_score(score: u8, authenticated: bool) -> Self {
        if !authenticated {
            return Self::Emergency;
        }
        match score {
            80.. => Self::Full,
            50..=79 => Self::Limited,
            20..=49 => Self::Offline,
            _ => Self::Emergency,
        }
    }

    pub fn features(self) -> &'static [Feature] {
        match self {
            Self::Full => &[
                Feature::LiveTracking,
                Feature::FleetOverview,
                Feature::PositionHistory,
                Feature::DeviceCommands,
                Feature::Alerts,
                Feature::Reports,
                Feature::CachedData,
            ],
            Self::Limited => &[
                Feature::LiveTracking,
                Feature::FleetOverview,
                Feature::PositionHistory,
                Feature::Alerts,
                Feature::Reports,
                Feature::CachedData,
            ],
            Self::Offline => &[
                Feature::CachedData,
                Feature::PositionHistory,
                Feature::Reports,
            ],
            Self::Emergency => &[Feature::CachedData],
        }
    }

    pub fn allows(self, feature: Feature) -> bool {
        self.features().contains(&feature)
    }
}

// ── Services and probes ──────────────────────────────────────────────

/// A dependency whose health feeds the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Service {
    GpsProvider,
    Database,
    Authentication,
    Realtime,
}

impl Service {
    /// Contribution to the health score; all weights sum to 100.
    pub fn weight(self) -> u8 {
        match self {
            Self::GpsProvider => 40,
            Self::Database => 30,
            Self::Authentication => 20,
            Self::Realtime => 10,
        }
    }
}

/// Health of every dependency at one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub gps_provider: bool,
    pub database: bool,
    pub authentication: bool,
    pub realtime: bool,
}

impl ServiceHealth {
    pub fn all_healthy() -> Self {
        Self {
            gps_provider: true,
            database: true,
            authentication: true,
            realtime: true,
        }
    }

    pub fn is_healthy(&self, service: Service) -> bool {
        match service {
            Service::GpsProvider => self.gps_provider,
            Service::Database => self.database,
            Service::Authentication => self.authentication,
            Service::Realtime => self.realtime,
        }
    }

    /// Weighted score in `0..=100`.
    pub fn score(&self) -> u8 {
        Service::iter()
            .filter(|s| self.is_healthy(*s))
            .map(Service::weight)
            .sum()
    }

    pub fn level(&self) -> DegradationLevel {
        DegradationLevel::from_score(self.score(), self.authentication)
    }
}

/// Something that can report whether a dependency is usable.
pub trait HealthProbe: Send + Sync {
    fn check(&self) -> BoxFuture<'_, bool>;
}

/// A probe with a fixed, externally settable answer.
#[derive(Debug)]
pub struct StaticProbe {
    healthy: AtomicBool,
}

impl StaticProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

impl HealthProbe for StaticProbe {
    fn check(&self) -> BoxFuture<'_, bool> {
        Box::pin(future::ready(self.healthy.load(Ordering::Relaxed)))
    }
}

/// The four probes the controller polls.
#[derive(Clone)]
pub struct Probes {
    pub gps_provider: Arc<dyn HealthProbe>,
    pub database: Arc<dyn HealthProbe>,
    pub authentication: Arc<dyn HealthProbe>,
    pub realtime: Arc<dyn HealthProbe>,
}

impl std::fmt::Debug for Probes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probes").finish_non_exhaustive()
    }
}

// ── Observable state ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationState {
    pub level: DegradationLevel,
    pub available_features: Vec<Feature>,
    pub disabled_features: Vec<Feature>,
    pub health_score: u8,
    pub services: ServiceHealth,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl DegradationState {
    fn from_health(services: ServiceHealth, checked_at: Option<DateTime<Utc>>) -> Self {
        let level = services.level();
        let (available_features, disabled_features): (Vec<_>, Vec<_>) =
            Feature::iter().partition(|f| level.allows(*f));
        Self {
            level,
            available_features,
            disabled_features,
            health_score: services.score(),
            services,
            last_health_check: checked_at,
        }
    }
}

/// One entry of the bounded health history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSample {
    pub at: DateTime<Utc>,
    pub score: u8,
    pub level: DegradationLevel,
}

/// Per-call options for [`DegradationController::execute_with_degradation`].
#[derive(Debug, Clone)]
pub struct ExecOptions<T> {
    /// Returned when the feature is gated off at the current level.
    pub fallback: Option<T>,
    /// Successful results are cached under this key and served when a
    /// later call with the same key fails.
    pub cache_key: Option<String>,
}

impl<T> Default for ExecOptions<T> {
    fn default() -> Self {
        Self {
            fallback: None,
            cache_key: None,
        }
    }
}

impl<T> ExecOptions<T> {
    pub fn cached(key: impl Into<String>) -> Self {
        Self {
            fallback: None,
            cache_key: Some(key.into()),
        }
    }

    pub fn with_fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    stored_at: Instant,
}

// ── Controller ───────────────────────────────────────────────────────

pub struct DegradationController {
    policy: DegradationPolicy,
    probes: Probes,
    state: watch::Sender<Arc<DegradationState>>,
    history: Mutex<VecDeque<HealthSample>>,
    cache: DashMap<String, CacheEntry>,
    fallbacks: DashMap<Feature, serde_json::Value>,
    task: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for DegradationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationController")
            .field("policy", &self.policy)
            .field("level", &self.level())
            .finish_non_exhaustive()
    }
}

impl DegradationController {
    /// Create a controller. Until the first health check the level is
    /// `Full`.
    pub fn new(policy: DegradationPolicy, probes: Probes) -> Self {
        let initial = DegradationState::from_health(ServiceHealth::all_healthy(), None);
        let (state, _) = watch::channel(Arc::new(initial));
        Self {
            policy,
            probes,
            state,
            history: Mutex::new(VecDeque::new()),
            cache: DashMap::new(),
            fallbacks: DashMap::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn level(&self) -> DegradationLevel {
        self.state.borrow().level
    }

    pub fn state(&self) -> Arc<DegradationState> {
        Arc::clone(&self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DegradationState>> {
        self.state.subscribe()
    }

    pub fn is_feature_available(&self, feature: Feature) -> bool {
        self.level().allows(feature)
    }

    /// Oldest first.
    pub fn health_history(&self) -> Vec<HealthSample> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Data served for `feature` when its operation fails and no fresh
    /// cache entry exists.
    pub fn register_fallback<T: Serialize>(
        &self,
        feature: Feature,
        data: &T,
    ) -> Result<(), CoreError> {
        let value = serde_json::to_value(data).map_err(|e| {
            CoreError::Internal(format!("cannot encode fallback for {feature}: {e}"))
        })?;
        self.fallbacks.insert(feature, value);
        Ok(())
    }

    /// Run `op` if `feature` is allowed at the current level.
    ///
    /// - Gated off: the caller's `fallback`, else
    ///   [`CoreError::FeatureUnavailable`].
    /// - Permitted but failed: a cache entry under `cache_key` younger
    ///   than the freshness threshold, else the registered fallback for
    ///   the feature, else the original error.
    pub async fn execute_with_degradation<T, F, Fut>(
        &self,
        feature: Feature,
        op: F,
        options: ExecOptions<T>,
    ) -> Result<T, CoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let level = self.level();
        if !level.allows(feature) {
            if let Some(fallback) = options.fallback {
                debug!(%feature, %level, "feature gated off, using caller fallback");
                return Ok(fallback);
            }
            return Err(CoreError::FeatureUnavailable { feature, level });
        }

        match op().await {
            Ok(value) => {
                if let Some(key) = options.cache_key {
                    match serde_json::to_value(&value) {
                        Ok(json) => {
                            self.cache.insert(
                                key,
                                CacheEntry {
                                    value: json,
                                    stored_at: Instant::now(),
                                },
                            );
                        }
                        Err(e) => debug!(error = %e, "result not cacheable"),
                    }
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(cached) = options
                    .cache_key
                    .as_deref()
                    .and_then(|key| self.fresh_cached::<T>(key))
                {
                    warn!(%feature, error = %err, "operation failed, serving cached result");
                    return Ok(cached);
                }
                if let Some(fallback) = self.registered_fallback::<T>(feature) {
                    warn!(%feature, error = %err, "operation failed, serving fallback data");
                    return Ok(fallback);
                }
                Err(err)
            }
        }
    }

    fn fresh_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.cache.get(key)?;
        if entry.stored_at.elapsed() >= self.policy.cache_ttl {
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    fn registered_fallback<T: DeserializeOwned>(&self, feature: Feature) -> Option<T> {
        let value = self.fallbacks.get(&feature)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Probe every service once and publish the resulting state.
    pub async fn check_health(&self) -> Arc<DegradationState> {
        let (gps_provider, database, authentication, realtime) = future::join4(
            self.probes.gps_provider.check(),
            self.probes.database.check(),
            self.probes.authentication.check(),
            self.probes.realtime.check(),
        )
        .await;

        self.apply_health(ServiceHealth {
            gps_provider,
            database,
            authentication,
            realtime,
        })
    }

    /// Publish a state derived from `services`.
    pub fn apply_health(&self, services: ServiceHealth) -> Arc<DegradationState> {
        let now = Utc::now();
        let next = Arc::new(DegradationState::from_health(services, Some(now)));
        let previous = self.level();
        if previous != next.level {
            info!(
                from = %previous,
                to = %next.level,
                score = next.health_score,
                "degradation level changed"
            );
        } else {
            debug!(score = next.health_score, level = %next.level, "health check");
        }

        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() >= self.policy.history_capacity.max(1) {
                history.pop_front();
            }
            history.push_back(HealthSample {
                at: now,
                score: next.health_score,
                level: next.level,
            });
        }

        self.state.send_replace(Arc::clone(&next));
        next
    }

    /// Start the periodic health check. The first check runs at once.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(health_task(
            Arc::clone(self),
            self.policy.health_interval,
            cancel.clone(),
        ));
        *task = Some((cancel, handle));
    }

    /// Stop the periodic check. Idempotent.
    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some((cancel, handle)) = task {
            cancel.cancel();
            let _ = handle.await;
        }
    }
}

async fn health_task(
    controller: Arc<DegradationController>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                controller.check_health().await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn probes(
        gps: &Arc<StaticProbe>,
        db: &Arc<StaticProbe>,
        auth: &Arc<StaticProbe>,
    ) -> Probes {
        Probes {
            gps_provider: Arc::clone(gps) as Arc<dyn HealthProbe>,
            database: Arc::clone(db) as Arc<dyn HealthProbe>,
            authentication: Arc::clone(auth) as Arc<dyn HealthProbe>,
            realtime: Arc::new(StaticProbe::new(true)),
        }
    }

    fn controller() -> (DegradationController, [Arc<StaticProbe>; 3]) {
        let gps = Arc::new(StaticProbe::new(true));
        let db = Arc::new(StaticProbe::new(true));
        let auth = Arc::new(StaticProbe::new(true));
        let ctl = DegradationController::new(DegradationPolicy::default(), probes(&gps, &db, &auth));
        (ctl, [gps, db, auth])
    }

    #[test]
    fn scores_map_to_levels() {
        let levels: Vec<_> = [85, 60, 30, 10]
            .into_iter()
            .map(|score| DegradationLevel::from_score(score, true))
            .collect();
        assert_eq!(
            levels,
            vec![
                DegradationLevel::Full,
                DegradationLevel::Limited,
                DegradationLevel::Offline,
                DegradationLevel::Emergency,
            ]
        );
        assert_eq!(
            DegradationLevel::from_score(100, false),
            DegradationLevel::Emergency
        );
    }

    #[test]
    fn levels_are_totally_ordered() {
        assert!(DegradationLevel::Full > DegradationLevel::Limited);
        assert!(DegradationLevel::Limited > DegradationLevel::Offline);
        assert!(DegradationLevel::Offline > DegradationLevel::Emergency);
    }

    #[test]
    fn weighted_score_from_services() {
        let mut health = ServiceHealth::all_healthy();
        assert_eq!(health.score(), 100);

        health.gps_provider = false;
        assert_eq!(health.score(), 60);
        assert_eq!(health.level(), DegradationLevel::Limited);

        health.database = false;
        assert_eq!(health.score(), 30);
        assert_eq!(health.level(), DegradationLevel::Offline);

        let auth_down = ServiceHealth {
            authentication: false,
            ..ServiceHealth::all_healthy()
        };
        assert_eq!(auth_down.score(), 80);
        assert_eq!(auth_down.level(), DegradationLevel::Emergency);
    }

    #[test]
    fn device_commands_only_at_full() {
        assert!(DegradationLevel::Full.allows(Feature::DeviceCommands));
        assert!(!DegradationLevel::Limited.allows(Feature::DeviceCommands));
        assert!(DegradationLevel::Offline.allows(Feature::Reports));
        assert!(!DegradationLevel::Offline.allows(Feature::LiveTracking));
        assert_eq!(DegradationLevel::Emergency.features(), &[Feature::CachedData]);
    }

    #[tokio::test]
    async fn gated_feature_uses_fallback_or_fails() {
        let (ctl, [gps, db, _]) = controller();
        gps.set(false);
        db.set(false);
        let state = ctl.check_health().await;
        assert_eq!(state.level, DegradationLevel::Offline);
        assert!(state.disabled_features.contains(&Feature::LiveTracking));

        let served = ctl
            .execute_with_degradation(
                Feature::LiveTracking,
                || async { Ok(vec![1_u32]) },
                ExecOptions::default().with_fallback(vec![0_u32]),
            )
            .await
            .unwrap();
        assert_eq!(served, vec![0]);

        let err = ctl
            .execute_with_degradation(
                Feature::LiveTracking,
                || async { Ok(1_u32) },
                ExecOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Feature 'live_tracking' is unavailable at degradation level 'offline'"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_serves_fresh_cache_then_registered_fallback() {
        let (ctl, _) = controller();

        let first = ctl
            .execute_with_degradation(
                Feature::FleetOverview,
                || async { Ok(42_u32) },
                ExecOptions::cached("overview"),
            )
            .await
            .unwrap();
        assert_eq!(first, 42);

        let failing = || async {
            Err::<u32, _>(CoreError::Transport {
                reason: "down".into(),
                status: None,
            })
        };

        let cached = ctl
            .execute_with_degradation(Feature::FleetOverview, failing, ExecOptions::cached("overview"))
            .await
            .unwrap();
        assert_eq!(cached, 42);

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        let stale = ctl
            .execute_with_degradation(Feature::FleetOverview, failing, ExecOptions::cached("overview"))
            .await;
        assert!(matches!(stale, Err(CoreError::Transport { .. })));

        ctl.register_fallback(Feature::FleetOverview, &7_u32).unwrap();
        let fallback = ctl
            .execute_with_degradation(Feature::FleetOverview, failing, ExecOptions::cached("overview"))
            .await
            .unwrap();
        assert_eq!(fallback, 7);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let policy = DegradationPolicy {
            history_capacity: 3,
            ..DegradationPolicy::default()
        };
        let (_, [gps, db, auth]) = controller();
        let ctl = DegradationController::new(policy, probes(&gps, &db, &auth));
        for _ in 0..5 {
            ctl.check_health().await;
        }
        let history = ctl.health_history();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|s| s.score == 100));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_check_tracks_probe_changes() {
        let (ctl, [_, _, auth]) = controller();
        let ctl = Arc::new(ctl);
        let mut rx = ctl.subscribe();

        ctl.start().await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().level, DegradationLevel::Full);

        auth.set(false);
        tokio::time::advance(Duration::from_secs(30)).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().level, DegradationLevel::Emergency);

        ctl.stop().await;
        ctl.stop().await;
    }
}
