// ── Adaptive polling engine ──
//
// One background task drives the fleet source on a single repeating
// timer. Each cycle refreshes the device list when due, fetches new
// positions, merges them into the store (last-write-wins by update
// time), recomputes per-vehicle status and adaptive intervals, writes
// the results and a job row to the sink, and publishes a new
// `TrackingState`.
//
// A failed cycle is recorded in the published state; it never ends the
// loop. Only one cycle runs at a time: ticks that arrive while a cycle
// is in flight are skipped and counted.
//
// Re-authentication bypasses degradation gating. While the last health
// check reports authentication down, every tick tries one login (still
// through the rate limiter) before the gated fetches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::ActivityTracker;
use crate::config::PollingOptions;
use crate::degradation::{DegradationController, ExecOptions, Feature};
use crate::error::CoreError;
use crate::fetch::{FleetSource, dedupe_latest};
use crate::model::{Device, FleetCounts, Position, Vehicle, VehicleStatus};
use crate::session::AuthState;
use crate::sink::{SyncJob, SyncSink};
use crate::store::FleetStore;

/// What a status line should show for the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrackingIndicator {
    /// Not started, or stopped.
    Idle,
    /// A cycle is in flight.
    Syncing,
    /// The last cycle succeeded.
    Live,
    /// The last cycle failed; polling continues.
    TransientError,
    /// Provider calls are held off (cooldown, open circuit) or the
    /// feature is gated by the degradation level.
    ServiceDegraded,
    /// Credentials are missing or rejected.
    NeedsSetup,
}

impl TrackingIndicator {
    pub fn for_error(err: &CoreError) -> Self {
        if err.needs_setup() {
            Self::NeedsSetup
        } else if err.is_service_degraded() {
            Self::ServiceDegraded
        } else {
            Self::TransientError
        }
    }
}

/// Observable engine state.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingState {
    pub vehicles: Arc<Vec<Vehicle>>,
    pub is_tracking: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub counts: FleetCounts,
    pub indicator: TrackingIndicator,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub skipped_ticks: u64,
    /// Delay before the next scheduled cycle.
    pub next_interval: Duration,
}

impl TrackingState {
    fn idle(next_interval: Duration) -> Self {
        Self {
            vehicles: Arc::new(Vec::new()),
            is_tracking: false,
            last_update: None,
            counts: FleetCounts::default(),
            indicator: TrackingIndicator::Idle,
            last_error: None,
            cycles: 0,
            skipped_ticks: 0,
            next_interval,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub devices_refreshed: bool,
    pub devices: usize,
    pub positions_received: usize,
    pub positions_applied: usize,
    pub counts: FleetCounts,
    pub next_interval: Duration,
}

/// Handle to the polling engine. Cheap to clone.
#[derive(Clone)]
pub struct PollingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    source: Arc<dyn FleetSource>,
    store: Arc<FleetStore>,
    sink: Arc<dyn SyncSink>,
    degradation: Option<Arc<DegradationController>>,
    options: ArcSwap<PollingOptions>,
    state: watch::Sender<TrackingState>,
    activity: std::sync::Mutex<ActivityTracker>,
    busy: AtomicBool,
    cycle_seq: AtomicU64,
    refresh: Notify,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for PollingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("options", &*self.inner.options.load())
            .field("busy", &self.inner.busy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears the busy flag when a cycle finishes or is dropped mid-flight.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollingEngine {
    pub fn new(
        source: Arc<dyn FleetSource>,
        store: Arc<FleetStore>,
        sink: Arc<dyn SyncSink>,
        options: PollingOptions,
    ) -> Self {
        Self::build(source, store, sink, options, None)
    }

    /// Route device and position fetches through `controller`, so they
    /// are gated by the degradation level.
    pub fn with_degradation(
        source: Arc<dyn FleetSource>,
        store: Arc<FleetStore>,
        sink: Arc<dyn SyncSink>,
        options: PollingOptions,
        controller: Arc<DegradationController>,
    ) -> Self {
        Self::build(source, store, sink, options, Some(controller))
    }

    fn build(
        source: Arc<dyn FleetSource>,
        store: Arc<FleetStore>,
        sink: Arc<dyn SyncSink>,
        options: PollingOptions,
        degradation: Option<Arc<DegradationController>>,
    ) -> Self {
        let (state, _) = watch::channel(TrackingState::idle(options.base_interval));
        Self {
            inner: Arc::new(EngineInner {
                source,
                store,
                sink,
                degradation,
                options: ArcSwap::from_pointee(options),
                state,
                activity: std::sync::Mutex::new(ActivityTracker::new()),
                busy: AtomicBool::new(false),
                cycle_seq: AtomicU64::new(0),
                refresh: Notify::new(),
                task: Mutex::new(None),
            }),
        }
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> TrackingState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingState> {
        self.inner.state.subscribe()
    }

    pub fn options(&self) -> Arc<PollingOptions> {
        self.inner.options.load_full()
    }

    pub fn store(&self) -> &Arc<FleetStore> {
        &self.inner.store
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().is_tracking
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start polling with `options`. The first cycle runs immediately.
    /// Calling `start` on a running engine only replaces the options.
    pub async fn start(&self, options: PollingOptions) {
        self.inner.options.store(Arc::new(options));

        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            debug!("polling engine already running, options updated");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(polling_task(self.clone(), cancel.clone()));
        *task = Some((cancel, handle));

        self.inner.state.send_modify(|s| s.is_tracking = true);
        info!("polling started");
    }

    /// Stop polling. Cancels the timer and aborts an in-flight cycle;
    /// nothing fetches after this returns. Idempotent.
    pub async fn stop(&self) {
        let task = self.inner.task.lock().await.take();
        let Some((cancel, handle)) = task else {
            return;
        };
        cancel.cancel();
        let _ = handle.await;

        self.inner.state.send_modify(|s| {
            s.is_tracking = false;
            s.indicator = TrackingIndicator::Idle;
        });
        info!("polling stopped");
    }

    /// Run a cycle now, outside the timer.
    ///
    /// While running, this wakes the background task; otherwise the
    /// cycle runs inline.
    pub async fn refresh_now(&self) -> Result<(), CoreError> {
        if self.inner.task.lock().await.is_some() {
            self.inner.refresh.notify_one();
            return Ok(());
        }
        self.poll_once().await.map(|_| ())
    }

    /// Run exactly one cycle and report what it did.
    pub async fn poll_once(&self) -> Result<CycleReport, CoreError> {
        self.guarded_cycle().await.unwrap_or_else(|| {
            Err(CoreError::Internal(
                "a polling cycle is already in flight".into(),
            ))
        })
    }

    // ── Cycle ────────────────────────────────────────────────────────

    /// `None` if another cycle holds the busy flag.
    async fn guarded_cycle(&self) -> Option<Result<CycleReport, CoreError>> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let _guard = BusyGuard(&self.inner.busy);
        Some(self.run_cycle().await)
    }

    /// The degradation level is held down by failed authentication,
    /// which gated fetches cannot clear.
    fn auth_blocked(&self) -> bool {
        self.inner
            .degradation
            .as_ref()
            .is_some_and(|c| !c.state().services.authentication)
    }

    fn note_skipped_tick(&self) {
        self.inner.state.send_modify(|s| s.skipped_ticks += 1);
        debug!("tick skipped, cycle still in flight");
    }

    async fn run_cycle(&self) -> Result<CycleReport, CoreError> {
        let mut job = SyncJob::new(Utc::now());
        self.inner.state.send_modify(|s| {
            s.indicator = TrackingIndicator::Syncing;
            s.cycles += 1;
        });

        let result = self.cycle_body(&mut job).await;

        job.finished_at = Utc::now();
        job.success = result.is_ok();
        job.error = result.as_ref().err().map(ToString::to_string);
        if let Err(e) = self.inner.sink.record_job(&job).await {
            warn!(error = %e, "failed to record sync job");
        }

        match &result {
            Ok(report) => {
                debug!(
                    devices = report.devices,
                    positions = report.positions_applied,
                    moving = report.counts.moving,
                    "polling cycle complete"
                );
                self.inner.state.send_modify(|s| {
                    s.indicator = TrackingIndicator::Live;
                    s.last_error = None;
                });
            }
            Err(e) => {
                warn!(error = %e, "polling cycle failed");
                let indicator = TrackingIndicator::for_error(e);
                let message = e.to_string();
                self.inner.state.send_modify(|s| {
                    s.indicator = indicator;
                    s.last_error = Some(message);
                });
            }
        }
        result
    }

    async fn cycle_body(&self, job: &mut SyncJob) -> Result<CycleReport, CoreError> {
        let inner = &self.inner;
        let options = inner.options.load_full();

        let seq = inner.cycle_seq.fetch_add(1, Ordering::AcqRel);
        let every = u64::from(options.device_refresh_every.max(1));
        let devices_refreshed = seq % every == 0 || !inner.store.has_devices();

        if devices_refreshed {
            let devices: Vec<Device> = self
                .gated(Feature::FleetOverview, || inner.source.devices())
                .await?;
            inner.sink.upsert_devices(&devices).await?;
            inner.store.replace_devices(devices);
        }
        job.devices = inner.store.device_count();

        let ids = inner.store.device_ids();
        let received: Vec<Position> = self
            .gated(Feature::LiveTracking, || inner.source.positions(&ids))
            .await?;
        let positions_received = received.len();
        let latest = dedupe_latest(received);
        let summary = inner.store.apply_positions(latest.iter().cloned());
        inner.sink.upsert_positions(&latest).await?;
        job.positions = summary.applied;

        let now = Utc::now();
        inner.store.mark_synced(now);
        let (vehicles, counts, next_interval) = self.rebuild_vehicles(&options, now);

        inner.state.send_modify(|s| {
            s.vehicles = Arc::new(vehicles);
            s.counts = counts;
            s.last_update = Some(now);
            s.next_interval = next_interval;
        });

        Ok(CycleReport {
            job_id: job.id,
            started_at: job.started_at,
            finished_at: now,
            devices_refreshed,
            devices: job.devices,
            positions_received,
            positions_applied: summary.applied,
            counts,
            next_interval,
        })
    }

    async fn gated<T, F, Fut>(&self, feature: Feature, op: F) -> Result<T, CoreError>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        match &self.inner.degradation {
            Some(controller) => {
                controller
                    .execute_with_degradation(feature, op, ExecOptions::default())
                    .await
            }
            None => op().await,
        }
    }

    fn rebuild_vehicles(
        &self,
        options: &PollingOptions,
        now: DateTime<Utc>,
    ) -> (Vec<Vehicle>, FleetCounts, Duration) {
        let store = &self.inner.store;
        let now_ms = now.timestamp_millis();
        let devices = store.devices_snapshot();

        let mut tracker = self
            .inner
            .activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tracker.retain_devices(devices.iter().map(|d| d.device_id.as_str()));

        let vehicles: Vec<Vehicle> = devices
            .iter()
            .map(|device| {
                let position = store.position(&device.device_id);
                let adaptive_interval =
                    tracker.observe(&device.device_id, position.as_deref(), now_ms, options);
                let status = VehicleStatus::classify(
                    position.as_deref(),
                    now_ms,
                    options.recency_window,
                    options.moving_speed_threshold,
                );
                Vehicle {
                    device: Arc::clone(device),
                    position,
                    status,
                    adaptive_interval,
                }
            })
            .collect();

        let counts = FleetCounts::from_statuses(vehicles.iter().map(|v| v.status));
        let next_interval = next_interval(options, &vehicles);
        (vehicles, counts, next_interval)
    }
}

/// Delay before the next cycle: the fixed base interval, or with
/// adaptive scheduling the shortest vehicle interval clamped to
/// `[min_interval, max_interval]`.
fn next_interval(options: &PollingOptions, vehicles: &[Vehicle]) -> Duration {
    if !options.adaptive_scheduling {
        return options.base_interval;
    }
    vehicles
        .iter()
        .map(|v| v.adaptive_interval)
        .min()
        .unwrap_or(options.base_interval)
        .clamp(options.min_interval, options.max_interval.max(options.min_interval))
}

// ── Background task ──────────────────────────────────────────────────

fn new_ticker(first: Instant, period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(first, period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Wait for the next authentication change. Pending forever once the
/// source has no (more) auth events.
async fn next_auth_state(rx: &mut Option<watch::Receiver<AuthState>>) -> Option<AuthState> {
    match rx {
        Some(receiver) => {
            if receiver.changed().await.is_ok() {
                Some(*receiver.borrow_and_update())
            } else {
                None
            }
        }
        None => std::future::pending().await,
    }
}

enum Wake {
    Cycle,
    Reconnect,
}

async fn polling_task(engine: PollingEngine, cancel: CancellationToken) {
    let inner = Arc::clone(&engine.inner);
    let mut period = inner.options.load().base_interval;
    let mut ticker = new_ticker(Instant::now(), period);
    let mut auth_rx = inner.source.auth_events();
    let mut awaiting_reauth = false;

    'run: loop {
        let wake = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => Wake::Cycle,
            () = inner.refresh.notified() => Wake::Cycle,
            state = next_auth_state(&mut auth_rx) => match state {
                Some(AuthState::Lost) => {
                    awaiting_reauth = true;
                    Wake::Reconnect
                }
                Some(AuthState::Authenticated) if awaiting_reauth => {
                    awaiting_reauth = false;
                    info!("re-authenticated, refreshing immediately");
                    Wake::Cycle
                }
                Some(_) => continue,
                None => {
                    auth_rx = None;
                    continue;
                }
            },
        };

        if matches!(wake, Wake::Reconnect) || awaiting_reauth || engine.auth_blocked() {
            info!("authentication lost, reconnecting");
            let reconnect = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = inner.source.reconnect() => result,
            };
            match reconnect {
                Ok(()) => {
                    awaiting_reauth = false;
                    if let Some(controller) = &inner.degradation {
                        controller.check_health().await;
                    }
                    info!("re-authenticated, refreshing immediately");
                }
                Err(e) => {
                    awaiting_reauth = true;
                    warn!(error = %e, "reconnect failed, will retry on next tick");
                    let indicator = TrackingIndicator::for_error(&e);
                    let message = e.to_string();
                    inner.state.send_modify(|s| {
                        s.indicator = indicator;
                        s.last_error = Some(message);
                    });
                    continue;
                }
            }
        }

        let cycle = engine.guarded_cycle();
        tokio::pin!(cycle);
        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("aborting in-flight cycle");
                    break 'run;
                }
                outcome = &mut cycle => break outcome,
                _ = ticker.tick() => engine.note_skipped_tick(),
            }
        };

        match outcome {
            Some(Ok(report)) => {
                awaiting_reauth = false;
                if report.next_interval != period {
                    period = report.next_interval;
                    ticker = new_ticker(Instant::now() + period, period);
                    debug!(interval_ms = period.as_millis(), "rescheduled polling timer");
                }
            }
            Some(Err(_)) => {}
            None => engine.note_skipped_tick(),
        }
    }

    debug!("polling task exited");
}
