//! `positions`: latest fix per device.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tabled::Tabled;

use fleetsync_core::{FleetSync, Position, SyncConfig, VehicleStatus};

use crate::cli::{GlobalOpts, PositionsArgs};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct PositionRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Lat")]
    latitude: String,
    #[tabled(rename = "Lon")]
    longitude: String,
    #[tabled(rename = "Speed")]
    speed: String,
    #[tabled(rename = "Heading")]
    heading: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Parse `--since`: epoch millis, an RFC 3339 instant, or an age like
/// "15m" counted back from `now`.
fn parse_since(raw: &str, now: DateTime<Utc>) -> Result<i64, CliError> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms.max(0));
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.timestamp_millis());
    }
    if let Ok(age) = humantime::parse_duration(raw) {
        let age = chrono::Duration::from_std(age).map_err(|e| CliError::Validation {
            field: "since".into(),
            reason: e.to_string(),
        })?;
        return Ok((now - age).timestamp_millis().max(0));
    }
    Err(CliError::Validation {
        field: "since".into(),
        reason: format!("'{raw}' is not epoch millis, RFC 3339, or a duration like 15m"),
    })
}

pub async fn handle(
    config: SyncConfig,
    args: PositionsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let since = args
        .since
        .as_deref()
        .map(|s| parse_since(s, Utc::now()))
        .transpose()?
        .unwrap_or(0);
    let polling = config.polling.clone();
    let requested = args.devices;

    let (positions, names) = FleetSync::oneshot(config, |sync| async move {
        let (ids, names): (Vec<String>, HashMap<String, String>) = if requested.is_empty() {
            let devices = sync.list_devices().await?;
            let names = devices
                .iter()
                .map(|d| (d.device_id.clone(), d.label().to_owned()))
                .collect();
            (devices.into_iter().map(|d| d.device_id).collect(), names)
        } else {
            (requested, HashMap::new())
        };

        let fetch = sync.positions(&ids, since).await?;
        tracing::debug!(
            count = fetch.positions.len(),
            cursor = fetch.last_query_time,
            "positions fetched"
        );
        Ok((fetch.positions, names))
    })
    .await?;

    let color = output::should_color(global.color);
    let now_ms = Utc::now().timestamp_millis();
    let to_row = |p: &Position| {
        let status = VehicleStatus::classify(
            Some(p),
            now_ms,
            polling.recency_window,
            polling.moving_speed_threshold,
        );
        PositionRow {
            device: names
                .get(&p.device_id)
                .cloned()
                .unwrap_or_else(|| p.device_id.clone()),
            status: output::paint_status(status, color),
            latitude: format!("{:.6}", p.latitude),
            longitude: format!("{:.6}", p.longitude),
            speed: format!("{:.1}", p.speed),
            heading: format!("{:.0}", p.heading),
            updated: output::fmt_time(p.updated_at()),
        }
    };

    let out = output::render_list(global.output, &positions, to_row, |p| {
        format!("{}\t{}\t{}", p.device_id, p.latitude, p.longitude)
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn since_accepts_epoch_millis() {
        assert_eq!(parse_since("1700000000000", now()).unwrap(), 1_700_000_000_000);
    }

    #[test]
    fn since_accepts_rfc3339() {
        assert_eq!(
            parse_since("2026-03-01T11:00:00Z", now()).unwrap(),
            now().timestamp_millis() - 3_600_000
        );
    }

    #[test]
    fn since_accepts_relative_age() {
        let age = i64::try_from(Duration::from_secs(900).as_millis()).unwrap();
        let expected = now().timestamp_millis() - age;
        assert_eq!(parse_since("15m", now()).unwrap(), expected);
    }

    #[test]
    fn since_rejects_garbage() {
        let err = parse_since("yesterday-ish", now()).unwrap_err();
        assert!(matches!(err, CliError::Validation { ref field, .. } if field == "since"));
    }
}
