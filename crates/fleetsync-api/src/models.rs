// GPS51 wire types
//
// Every reply carries a numeric `status` (0 = success) and an optional
// `cause`. Payload fields sit beside them at the top level. Fields use
// `#[serde(default)]` liberally because the provider omits keys that have
// no value for a given device model.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

// ── Reply envelope ───────────────────────────────────────────────────

/// A provider reply, discriminated on its `status` field.
#[derive(Debug)]
pub enum ProviderReply<T> {
    Success(T),
    Failure { status: i64, cause: String },
}

impl<T: DeserializeOwned> ProviderReply<T> {
    /// Parse a raw body. A missing or non-numeric `status` is a
    /// deserialization error, not a success.
    pub fn parse(body: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.to_owned(),
        })?;

        let status = match value.get("status") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::Deserialization {
            message: "reply has no numeric `status` field".into(),
            body: body.to_owned(),
        })?;

        if status != 0 {
            let cause = value
                .get("cause")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            return Ok(Self::Failure { status, cause });
        }

        serde_json::from_value(value)
            .map(Self::Success)
            .map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.to_owned(),
            })
    }
}

impl<T> ProviderReply<T> {
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::Failure { status, cause } => Err(Error::from_status(status, cause)),
        }
    }
}

// ── Login ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct LoginReply {
    pub token: String,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MonitorListReply {
    #[serde(default)]
    pub groups: Vec<DeviceGroup>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceGroup {
    #[serde(default)]
    pub groupname: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

/// A device as listed by `querymonitorlist`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "deviceid")]
    pub device_id: String,
    #[serde(default, rename = "devicename")]
    pub device_name: String,
    #[serde(default, rename = "devicetype")]
    pub device_type: i64,
    /// Epoch milliseconds of the last contact.
    #[serde(default, rename = "lastactivetime")]
    pub last_active_time: i64,
    /// Filled in from the enclosing group; absent on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// Catch-all for undocumented fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ── Positions ────────────────────────────────────────────────────────

/// Reply of `lastposition`: the records plus the provider's query cursor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionBatch {
    #[serde(default)]
    pub records: Vec<PositionRecord>,
    /// Echoed by the provider; pass it back as the next `since`.
    #[serde(default, rename = "lastquerypositiontime")]
    pub last_query_time: i64,
}

/// A single position/telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    #[serde(rename = "deviceid")]
    pub device_id: String,
    #[serde(rename = "callat")]
    pub latitude: f64,
    #[serde(rename = "callon")]
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default, rename = "course")]
    pub heading: f64,
    /// 1 while the device reports motion.
    #[serde(default)]
    pub moving: i64,
    /// Epoch milliseconds of the fix.
    #[serde(rename = "updatetime")]
    pub update_time: i64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub fuel: Option<f64>,
    #[serde(default, rename = "accstatus")]
    pub acc_status: Option<i64>,
    #[serde(default, rename = "voltagev")]
    pub voltage: Option<f64>,
    #[serde(default, rename = "totaldistance")]
    pub total_distance: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ── Commands ─────────────────────────────────────────────────────────

/// Acknowledgement of a `setcommand` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReceipt {
    #[serde(default, rename = "commandid")]
    pub command_id: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn success_reply_parses_payload() {
        let reply: ProviderReply<LoginReply> =
            ProviderReply::parse(r#"{"status":0,"cause":"OK","token":"abc"}"#).unwrap();
        let login = reply.into_result().unwrap();
        assert_eq!(login.token, "abc");
    }

    #[test]
    fn failure_reply_keeps_status_and_cause() {
        let reply: ProviderReply<LoginReply> =
            ProviderReply::parse(r#"{"status":1,"cause":"bad password"}"#).unwrap();
        match reply {
            ProviderReply::Failure { status, cause } => {
                assert_eq!(status, 1);
                assert_eq!(cause, "bad password");
            }
            ProviderReply::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn string_status_is_accepted() {
        let reply: ProviderReply<PositionBatch> =
            ProviderReply::parse(r#"{"status":"8902","cause":"limit"}"#).unwrap();
        assert!(reply.into_result().unwrap_err().is_rate_limited());
    }

    #[test]
    fn missing_status_is_an_error() {
        let result: Result<ProviderReply<PositionBatch>, _> =
            ProviderReply::parse(r#"{"records":[]}"#);
        assert!(matches!(result, Err(Error::Deserialization { .. })));
    }

    #[test]
    fn position_record_maps_wire_names() {
        let batch: PositionBatch = serde_json::from_str(
            r#"{
                "records": [{
                    "deviceid": "860000001",
                    "callat": 6.5244, "callon": 3.3792,
                    "speed": 42.5, "course": 180, "moving": 1,
                    "updatetime": 1700000000000,
                    "accstatus": 1, "voltagev": 12.6,
                    "strstatus": "ACC ON"
                }],
                "lastquerypositiontime": 1700000000500
            }"#,
        )
        .unwrap();

        assert_eq!(batch.last_query_time, 1_700_000_000_500);
        let rec = &batch.records[0];
        assert_eq!(rec.device_id, "860000001");
        assert!((rec.heading - 180.0).abs() < f64::EPSILON);
        assert_eq!(rec.acc_status, Some(1));
        assert_eq!(rec.extra["strstatus"], "ACC ON");
    }
}
