// ── Position domain type ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetsync_api::PositionRecord;

/// Optional telemetry some device models report alongside the fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub fuel: Option<f64>,
    pub engine_on: Option<bool>,
    pub battery_voltage: Option<f64>,
    pub altitude: Option<f64>,
    pub total_distance: Option<f64>,
}

/// A single timestamped reading. One logical "latest" per device,
/// chosen by maximum `update_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
    pub moving: bool,
    /// Epoch milliseconds.
    pub update_time: i64,
    #[serde(default)]
    pub telemetry: Telemetry,
}

impl Position {
    /// Movement flag set and speed above `threshold`.
    pub fn is_moving(&self, threshold: f64) -> bool {
        self.moving && self.speed > threshold
    }

    /// Milliseconds between the fix and `now_ms` (never negative).
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.update_time).max(0)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.update_time)
    }

    /// `true` if `self` should replace `other` as the latest reading.
    pub fn supersedes(&self, other: &Self) -> bool {
        self.update_time >= other.update_time
    }
}

impl From<PositionRecord> for Position {
    fn from(record: PositionRecord) -> Self {
        Self {
            device_id: record.device_id,
            latitude: record.latitude,
            longitude: record.longitude,
            speed: record.speed,
            heading: record.heading,
            moving: record.moving != 0,
            update_time: record.update_time,
            telemetry: Telemetry {
                fuel: record.fuel,
                engine_on: record.acc_status.map(|acc| acc != 0),
                battery_voltage: record.voltage,
                altitude: record.altitude,
                total_distance: record.total_distance,
            },
        }
    }
}
