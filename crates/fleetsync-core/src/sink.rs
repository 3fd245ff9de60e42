// ── Backend persistence seam ──
//
// The sync core writes what it fetches to a backend through `SyncSink`:
// a devices table keyed by provider device id, a positions table, and
// a job log with one row per polling cycle. `MemorySink` keeps all three
// in process and is what the CLI uses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::degradation::HealthProbe;
use crate::error::CoreError;
use crate::model::{Device, Position};

/// One polling cycle, as recorded in the job log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub devices: usize,
    pub positions: usize,
}

impl SyncJob {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            success: false,
            error: None,
            devices: 0,
            positions: 0,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Where synced data goes.
pub trait SyncSink: Send + Sync {
    fn upsert_devices<'a>(&'a self, devices: &'a [Device]) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Positions arrive deduplicated per device; implementations must
    /// still refuse to overwrite a newer stored reading.
    fn upsert_positions<'a>(
        &'a self,
        positions: &'a [Position],
    ) -> BoxFuture<'a, Result<(), CoreError>>;

    fn record_job<'a>(&'a self, job: &'a SyncJob) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Cheap reachability check used as the database health probe.
    fn ping(&self) -> BoxFuture<'_, Result<(), CoreError>>;
}

/// In-process sink.
#[derive(Debug)]
pub struct MemorySink {
    devices: DashMap<String, Device>,
    positions: DashMap<String, Position>,
    jobs: Mutex<VecDeque<SyncJob>>,
    job_capacity: usize,
    available: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_job_capacity(1000)
    }

    pub fn with_job_capacity(job_capacity: usize) -> Self {
        Self {
            devices: DashMap::new(),
            positions: DashMap::new(),
            jobs: Mutex::new(VecDeque::new()),
            job_capacity: job_capacity.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (writes and pings fail).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn position(&self, device_id: &str) -> Option<Position> {
        self.positions.get(device_id).map(|p| p.value().clone())
    }

    /// Oldest first.
    pub fn jobs(&self) -> Vec<SyncJob> {
        self.lock_jobs().iter().cloned().collect()
    }

    pub fn last_job(&self) -> Option<SyncJob> {
        self.lock_jobs().back().cloned()
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, VecDeque<SyncJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), CoreError> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(CoreError::Storage {
                message: "backend unavailable".into(),
            })
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSink for MemorySink {
    fn upsert_devices<'a>(&'a self, devices: &'a [Device]) -> BoxFuture<'a, Result<(), CoreError>> {
        let result = self.ensure_available().map(|()| {
            for device in devices {
                self.devices
                    .insert(device.device_id.clone(), device.clone());
            }
        });
        Box::pin(future::ready(result))
    }

    fn upsert_positions<'a>(
        &'a self,
        positions: &'a [Position],
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        let result = self.ensure_available().map(|()| {
            for position in positions {
                self.positions
                    .entry(position.device_id.clone())
                    .and_modify(|stored| {
                        if position.supersedes(stored) {
                            stored.clone_from(position);
                        }
                    })
                    .or_insert_with(|| position.clone());
            }
        });
        Box::pin(future::ready(result))
    }

    fn record_job<'a>(&'a self, job: &'a SyncJob) -> BoxFuture<'a, Result<(), CoreError>> {
        let result = self.ensure_available().map(|()| {
            let mut jobs = self.lock_jobs();
            if jobs.len() >= self.job_capacity {
                jobs.pop_front();
            }
            jobs.push_back(job.clone());
        });
        Box::pin(future::ready(result))
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(future::ready(self.ensure_available()))
    }
}

/// Adapts a sink into the database health probe.
pub struct SinkProbe(pub Arc<dyn SyncSink>);

impl HealthProbe for SinkProbe {
    fn check(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.0.ping().await.is_ok() })
    }
}
