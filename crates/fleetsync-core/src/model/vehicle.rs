// ── Vehicle status and fleet aggregation ──

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum::{Display, EnumString};

use super::{Device, Position};

/// Presentation status of a single vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VehicleStatus {
    Moving,
    Parked,
    Offline,
}

impl VehicleStatus {
    /// Classify a vehicle from its latest position.
    ///
    /// A position older than `recency_window` (or no position at all) is
    /// offline; otherwise the vehicle is moving when its movement flag is
    /// set and its speed exceeds `speed_threshold`, and parked when not.
    pub fn classify(
        position: Option<&Position>,
        now_ms: i64,
        recency_window: Duration,
        speed_threshold: f64,
    ) -> Self {
        let Some(position) = position else {
            return Self::Offline;
        };
        let window_ms = i64::try_from(recency_window.as_millis()).unwrap_or(i64::MAX);
        if position.age_ms(now_ms) > window_ms {
            Self::Offline
        } else if position.is_moving(speed_threshold) {
            Self::Moving
        } else {
            Self::Parked
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// A device joined with its latest position and derived status.
#[derive(Debug, Clone, Serialize)]
pub struct Vehicle {
    pub device: Arc<Device>,
    pub position: Option<Arc<Position>>,
    pub status: VehicleStatus,
    /// Predicted refresh interval for this vehicle.
    pub adaptive_interval: Duration,
}

/// Fleet-level counts for one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetCounts {
    pub total: usize,
    pub active: usize,
    pub moving: usize,
    pub parked: usize,
    pub offline: usize,
}

impl FleetCounts {
    pub fn from_statuses(statuses: impl IntoIterator<Item = VehicleStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            match status {
                VehicleStatus::Moving => counts.moving += 1,
                VehicleStatus::Parked => counts.parked += 1,
                VehicleStatus::Offline => {}
            }
            if status.is_active() {
                counts.active += 1;
            }
        }
        counts.offline = counts.total - counts.active;
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Telemetry;

    const WINDOW: Duration = Duration::from_secs(300);

    fn position(update_time: i64, moving: bool, speed: f64) -> Position {
        Position {
            device_id: "A".into(),
            latitude: 0.0,
            longitude: 0.0,
            speed,
            heading: 0.0,
            moving,
            update_time,
            telemetry: Telemetry::default(),
        }
    }

    #[test]
    fn classify_by_recency_and_motion() {
        let now = 1_000_000;
        let fresh_moving = position(now - 1_000, true, 20.0);
        let fresh_slow = position(now - 1_000, true, 3.0);
        let stale = position(now - 301_000, true, 40.0);

        assert_eq!(
            VehicleStatus::classify(Some(&fresh_moving), now, WINDOW, 5.0),
            VehicleStatus::Moving
        );
        assert_eq!(
            VehicleStatus::classify(Some(&fresh_slow), now, WINDOW, 5.0),
            VehicleStatus::Parked
        );
        assert_eq!(
            VehicleStatus::classify(Some(&stale), now, WINDOW, 5.0),
            VehicleStatus::Offline
        );
        assert_eq!(
            VehicleStatus::classify(None, now, WINDOW, 5.0),
            VehicleStatus::Offline
        );
    }

    #[test]
    fn offline_is_total_minus_active() {
        let counts = FleetCounts::from_statuses([
            VehicleStatus::Moving,
            VehicleStatus::Parked,
            VehicleStatus::Offline,
            VehicleStatus::Offline,
        ]);
        assert_eq!(
            counts,
            FleetCounts {
                total: 4,
                active: 2,
                moving: 1,
                parked: 1,
                offline: 2,
            }
        );
    }

    #[test]
    fn status_strings() {
        assert_eq!(VehicleStatus::Parked.to_string(), "parked");
        assert_eq!("offline".parse::<VehicleStatus>().ok(), Some(VehicleStatus::Offline));
    }
}
