// ── Per-vehicle activity tracking ──
//
// In-memory only. An entry is created the first time a device is
// observed and updated once per polling cycle. The derived interval is
// predictive; the engine's timer stays shared unless adaptive scheduling
// is switched on.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::PollingOptions;
use crate::model::Position;

/// Movement history for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleActivity {
    pub device_id: String,
    /// Epoch ms of the last observation that counted as moving, or of
    /// the first observation when the vehicle has never been seen moving.
    pub last_movement_ms: i64,
    pub consecutive_stationary: u32,
}

impl VehicleActivity {
    pub fn new(device_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            device_id: device_id.into(),
            last_movement_ms: now_ms,
            consecutive_stationary: 0,
        }
    }

    /// Record one cycle's observation.
    pub fn observe(&mut self, moving: bool, now_ms: i64) {
        if moving {
            self.last_movement_ms = now_ms;
            self.consecutive_stationary = 0;
        } else {
            self.consecutive_stationary = self.consecutive_stationary.saturating_add(1);
        }
    }

    pub fn stationary_for(&self, now_ms: i64) -> Duration {
        let ms = now_ms.saturating_sub(self.last_movement_ms).max(0);
        Duration::from_millis(u64::try_from(ms).unwrap_or(0))
    }
}

/// Refresh interval for a vehicle.
///
/// Moving vehicles always get `min_interval`. A vehicle stationary for
/// longer than `stationary_threshold` backs off to
/// `min(max_interval, base_interval * (1 + count * stationary_growth))`.
/// Everything else uses `base_interval`.
pub fn adaptive_interval(
    position: Option<&Position>,
    activity: &VehicleActivity,
    now_ms: i64,
    opts: &PollingOptions,
) -> Duration {
    if position.is_some_and(|p| p.is_moving(opts.moving_speed_threshold)) {
        return opts.min_interval;
    }

    if activity.stationary_for(now_ms) > opts.stationary_threshold {
        let factor =
            1.0 + f64::from(activity.consecutive_stationary) * opts.stationary_growth;
        let grown = opts.base_interval.mul_f64(factor.max(0.0));
        return grown.min(opts.max_interval);
    }

    opts.base_interval
}

/// Activity entries for the whole fleet, keyed by device id.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    entries: HashMap<String, VehicleActivity>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a device's latest position and return its new interval.
    pub fn observe(
        &mut self,
        device_id: &str,
        position: Option<&Position>,
        now_ms: i64,
        opts: &PollingOptions,
    ) -> Duration {
        let activity = self
            .entries
            .entry(device_id.to_owned())
            .or_insert_with(|| VehicleActivity::new(device_id, now_ms));
        let moving = position.is_some_and(|p| p.is_moving(opts.moving_speed_threshold));
        activity.observe(moving, now_ms);
        adaptive_interval(position, activity, now_ms, opts)
    }

    pub fn get(&self, device_id: &str) -> Option<&VehicleActivity> {
        self.entries.get(device_id)
    }

    /// Drop entries for devices no longer in the fleet.
    pub fn retain_devices<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = ids.into_iter().collect();
        self.entries.retain(|id, _| keep.contains(id.as_str()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Telemetry;

    fn position(moving: bool, speed: f64) -> Position {
        Position {
            device_id: "A".into(),
            latitude: 0.0,
            longitude: 0.0,
            speed,
            heading: 0.0,
            moving,
            update_time: 0,
            telemetry: Telemetry::default(),
        }
    }

    #[test]
    fn moving_vehicle_always_gets_min_interval() {
        let opts = PollingOptions::default();
        let long_parked = VehicleActivity {
            device_id: "A".into(),
            last_movement_ms: 0,
            consecutive_stationary: 40,
        };
        let moving = position(true, 20.0);

        assert_eq!(
            adaptive_interval(Some(&moving), &long_parked, 10_000_000, &opts),
            opts.min_interval
        );
    }

    #[test]
    fn stationary_backoff_uses_growth_factor() {
        let opts = PollingOptions::default();
        let activity = VehicleActivity {
            device_id: "A".into(),
            last_movement_ms: 0,
            consecutive_stationary: 4,
        };
        let parked = position(false, 0.0);

        let interval = adaptive_interval(Some(&parked), &activity, 601_000, &opts);
        let expected = opts.base_interval.mul_f64(1.0 + 4.0 * 0.5).min(opts.max_interval);
        assert_eq!(interval, expected);
        assert_eq!(interval, Duration::from_secs(90));
    }

    #[test]
    fn stationary_backoff_is_capped() {
        let opts = PollingOptions::default();
        let activity = VehicleActivity {
            device_id: "A".into(),
            last_movement_ms: 0,
            consecutive_stationary: 20,
        };
        assert_eq!(
            adaptive_interval(None, &activity, 601_000, &opts),
            opts.max_interval
        );
    }

    #[test]
    fn recently_stopped_uses_base_interval() {
        let opts = PollingOptions::default();
        let activity = VehicleActivity {
            device_id: "A".into(),
            last_movement_ms: 0,
            consecutive_stationary: 4,
        };
        assert_eq!(
            adaptive_interval(Some(&position(false, 0.0)), &activity, 599_000, &opts),
            opts.base_interval
        );
    }

    #[test]
    fn tracker_resets_count_on_movement() {
        let opts = PollingOptions::default();
        let mut tracker = ActivityTracker::new();

        tracker.observe("A", Some(&position(false, 0.0)), 0, &opts);
        tracker.observe("A", Some(&position(false, 0.0)), 30_000, &opts);
        assert_eq!(tracker.get("A").map(|a| a.consecutive_stationary), Some(2));

        tracker.observe("A", Some(&position(true, 30.0)), 60_000, &opts);
        let activity = tracker.get("A").unwrap();
        assert_eq!(activity.consecutive_stationary, 0);
        assert_eq!(activity.last_movement_ms, 60_000);

        tracker.retain_devices(["B"]);
        assert!(tracker.is_empty());
    }
}
