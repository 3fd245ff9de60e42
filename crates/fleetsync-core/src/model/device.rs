// ── Device domain type ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetsync_api::DeviceRecord;

/// A trackable unit. Replaced wholesale on every device-list fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub device_type: i64,
    pub group_name: Option<String>,
    pub last_active: Option<DateTime<Utc>>,
}

impl Device {
    /// Display label: the name, or the id when the provider has none.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.device_id
        } else {
            &self.name
        }
    }
}

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Self {
            last_active: (record.last_active_time > 0)
                .then(|| DateTime::from_timestamp_millis(record.last_active_time))
                .flatten(),
            device_id: record.device_id,
            name: record.device_name,
            device_type: record.device_type,
            group_name: record.group_name,
        }
    }
}
