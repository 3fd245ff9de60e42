// ── FleetSync facade ──
//
// Wires the sync core together for one provider account: one rate
// limiter shared by every provider call, one session manager, the
// fetcher, the fleet store, the sink, the degradation controller and
// the polling engine.

use std::sync::Arc;

use fleetsync_api::{CommandReceipt, Gps51Client, TlsMode, TransportConfig};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{SyncConfig, TlsVerification};
use crate::degradation::{
    DegradationController, DegradationState, ExecOptions, Feature, HealthProbe, Probes,
    StaticProbe,
};
use crate::error::CoreError;
use crate::fetch::{Fetcher, PositionFetch};
use crate::model::Device;
use crate::polling::{CycleReport, PollingEngine, TrackingState};
use crate::rate_limit::RateLimiter;
use crate::session::{AuthState, SessionManager};
use crate::sink::{MemorySink, SinkProbe, SyncSink};
use crate::store::FleetStore;

/// The sync core for one provider account. Cheap to clone.
#[derive(Clone)]
pub struct FleetSync {
    inner: Arc<FleetSyncInner>,
}

struct FleetSyncInner {
    config: SyncConfig,
    limiter: Arc<RateLimiter>,
    sessions: Arc<SessionManager>,
    fetcher: Arc<Fetcher>,
    store: Arc<FleetStore>,
    sink: Arc<dyn SyncSink>,
    degradation: Arc<DegradationController>,
    realtime: Arc<StaticProbe>,
    engine: PollingEngine,
}

impl std::fmt::Debug for FleetSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetSync")
            .field("url", &self.inner.config.url.as_str())
            .field("username", &self.inner.config.credentials.username)
            .finish_non_exhaustive()
    }
}

impl FleetSync {
    /// Build the core with an in-memory sink. Does NOT contact the
    /// provider; call [`connect`](Self::connect) for that.
    pub fn new(config: SyncConfig) -> Result<Self, CoreError> {
        Self::with_sink(config, Arc::new(MemorySink::new()))
    }

    pub fn with_sink(config: SyncConfig, sink: Arc<dyn SyncSink>) -> Result<Self, CoreError> {
        let transport = build_transport(&config);
        let client = Gps51Client::new(config.url.clone(), &transport)?;
        Ok(Self::with_client(config, client, sink))
    }

    /// Build the core around an existing client.
    pub fn with_client(config: SyncConfig, client: Gps51Client, sink: Arc<dyn SyncSink>) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let sessions = Arc::new(SessionManager::new(
            client.clone(),
            config.credentials.clone(),
            Arc::clone(&limiter),
            config.session_ttl,
            config.reauth_attempts,
        ));
        let fetcher = Arc::new(Fetcher::new(
            client,
            Arc::clone(&limiter),
            Arc::clone(&sessions),
        ));
        let store = Arc::new(FleetStore::new());
        let realtime = Arc::new(StaticProbe::new(true));

        let probes = Probes {
            gps_provider: Arc::clone(&limiter) as Arc<dyn HealthProbe>,
            database: Arc::new(SinkProbe(Arc::clone(&sink))),
            authentication: Arc::clone(&sessions) as Arc<dyn HealthProbe>,
            realtime: Arc::clone(&realtime) as Arc<dyn HealthProbe>,
        };
        let degradation = Arc::new(DegradationController::new(
            config.degradation.clone(),
            probes,
        ));

        let engine = PollingEngine::with_degradation(
            Arc::clone(&fetcher) as Arc<dyn crate::fetch::FleetSource>,
            Arc::clone(&store),
            Arc::clone(&sink),
            config.polling.clone(),
            Arc::clone(&degradation),
        );

        Self {
            inner: Arc::new(FleetSyncInner {
                config,
                limiter,
                sessions,
                fetcher,
                store,
                sink,
                degradation,
                realtime,
                engine,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Authenticate and start the health monitor.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.sessions.authenticate().await?;
        self.inner.degradation.start().await;
        debug!("connected");
        Ok(())
    }

    /// Start the polling engine with the configured options.
    pub async fn start_tracking(&self) {
        self.inner
            .engine
            .start(self.inner.config.polling.clone())
            .await;
    }

    pub async fn stop_tracking(&self) {
        self.inner.engine.stop().await;
    }

    /// Stop background work and end the provider session.
    pub async fn disconnect(&self) {
        self.inner.engine.stop().await;
        self.inner.degradation.stop().await;
        self.inner.sessions.logout().await;
        info!("disconnected");
    }

    /// Connect, run `f`, and disconnect, for one-off commands.
    pub async fn oneshot<F, Fut, T>(config: SyncConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(FleetSync) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let sync = FleetSync::new(config)?;
        sync.connect().await?;
        let result = f(sync.clone()).await;
        sync.disconnect().await;
        result
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Run exactly one polling cycle.
    pub async fn sync_once(&self) -> Result<CycleReport, CoreError> {
        self.inner.engine.poll_once().await
    }

    pub async fn refresh_now(&self) -> Result<(), CoreError> {
        self.inner.engine.refresh_now().await
    }

    /// List devices, falling back to the last good list while the
    /// provider is failing.
    pub async fn list_devices(&self) -> Result<Vec<Device>, CoreError> {
        let fetcher = &self.inner.fetcher;
        self.inner
            .degradation
            .execute_with_degradation(
                Feature::FleetOverview,
                || fetcher.list_devices(),
                ExecOptions::cached("devices"),
            )
            .await
    }

    /// Latest positions for `device_ids` newer than `since` (`0` = all).
    pub async fn positions(
        &self,
        device_ids: &[String],
        since: i64,
    ) -> Result<PositionFetch, CoreError> {
        let positions = self
            .inner
            .degradation
            .execute_with_degradation(
                Feature::PositionHistory,
                || async {
                    let fetch = self.inner.fetcher.fetch_positions(device_ids, since).await?;
                    self.inner
                        .store
                        .apply_positions(fetch.positions.iter().cloned());
                    Ok((fetch.positions, fetch.last_query_time))
                },
                ExecOptions::default(),
            )
            .await?;
        Ok(PositionFetch {
            positions: positions.0,
            last_query_time: positions.1,
        })
    }

    /// Queue a command for a device. Only allowed at full service.
    pub async fn send_command(
        &self,
        device_id: &str,
        command: &str,
        params: &[String],
    ) -> Result<CommandReceipt, CoreError> {
        let fetcher = &self.inner.fetcher;
        self.inner
            .degradation
            .execute_with_degradation(
                Feature::DeviceCommands,
                || fetcher.send_command(device_id, command, params),
                ExecOptions::default(),
            )
            .await
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<FleetStore> {
        &self.inner.store
    }

    pub fn engine(&self) -> &PollingEngine {
        &self.inner.engine
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.inner.sessions
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.inner.fetcher
    }

    pub fn sink(&self) -> &Arc<dyn SyncSink> {
        &self.inner.sink
    }

    pub fn degradation(&self) -> &Arc<DegradationController> {
        &self.inner.degradation
    }

    /// Toggle the realtime channel's health as seen by the degradation
    /// controller.
    pub fn set_realtime_healthy(&self, healthy: bool) {
        self.inner.realtime.set(healthy);
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.sessions.auth_state()
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.inner.engine.state()
    }

    pub fn subscribe_tracking(&self) -> watch::Receiver<TrackingState> {
        self.inner.engine.subscribe()
    }

    pub fn subscribe_degradation(&self) -> watch::Receiver<Arc<DegradationState>> {
        self.inner.degradation.subscribe()
    }
}

fn build_transport(config: &SyncConfig) -> TransportConfig {
    TransportConfig {
        tls: match &config.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        },
        timeout: config.timeout,
    }
}
