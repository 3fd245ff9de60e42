// ── Fleet store: devices and their latest positions ──

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::collection::Collection;
use crate::model::{Device, Position};
use crate::stream::SnapshotStream;

/// Outcome of applying a position batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Records that became the latest position for their device.
    pub applied: usize,
    /// Records older than the stored position, ignored.
    pub stale: usize,
}

/// Central reactive storage for the synced fleet.
///
/// Devices are replaced wholesale on each device-list fetch. Positions
/// hold one latest reading per device and are last-write-wins by
/// `update_time`, never by arrival order.
pub struct FleetStore {
    devices: Collection<Device>,
    positions: Collection<Position>,
    last_sync: watch::Sender<Option<DateTime<Utc>>>,
}

impl FleetStore {
    pub fn new() -> Self {
        let (last_sync, _) = watch::channel(None);
        Self {
            devices: Collection::new(),
            positions: Collection::new(),
            last_sync,
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Replace the device list. Positions of devices that left the fleet
    /// are dropped.
    pub fn replace_devices(&self, devices: Vec<Device>) {
        let ids: HashSet<String> = devices.iter().map(|d| d.device_id.clone()).collect();
        self.devices
            .replace_all(devices.into_iter().map(|d| (d.device_id.clone(), d)));

        for position in self.positions.snapshot().iter() {
            if !ids.contains(&position.device_id) {
                self.positions.remove(&position.device_id);
            }
        }
    }

    /// Apply a batch of positions, keeping the freshest per device.
    pub fn apply_positions(&self, positions: impl IntoIterator<Item = Position>) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for position in positions {
            let key = position.device_id.clone();
            if self
                .positions
                .upsert_if(key, position, |new, old| new.supersedes(old))
            {
                summary.applied += 1;
            } else {
                summary.stale += 1;
            }
        }
        summary
    }

    pub fn mark_synced(&self, at: DateTime<Utc>) {
        self.last_sync.send_replace(Some(at));
    }

    pub fn clear(&self) {
        self.devices.clear();
        self.positions.clear();
        self.last_sync.send_replace(None);
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn positions_snapshot(&self) -> Arc<Vec<Arc<Position>>> {
        self.positions.snapshot()
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.devices.get(device_id)
    }

    pub fn position(&self, device_id: &str) -> Option<Arc<Position>> {
        self.positions.get(device_id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices
            .snapshot()
            .iter()
            .map(|d| d.device_id.clone())
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn has_devices(&self) -> bool {
        !self.devices.is_empty()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.borrow()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_devices(&self) -> SnapshotStream<Device> {
        SnapshotStream::new(self.devices.subscribe())
    }

    pub fn subscribe_positions(&self) -> SnapshotStream<Position> {
        SnapshotStream::new(self.positions.subscribe())
    }
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}
