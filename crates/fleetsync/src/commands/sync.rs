//! `sync`: run exactly one polling cycle.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;

use fleetsync_core::{CycleReport, FleetSync, SyncConfig, Vehicle};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct SyncOutput {
    report: CycleReport,
    vehicles: Arc<Vec<Vehicle>>,
}

#[derive(Tabled)]
pub(crate) struct VehicleRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Speed")]
    speed: String,
    #[tabled(rename = "Position")]
    position: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Next")]
    next: String,
}

impl VehicleRow {
    pub(crate) fn new(v: &Vehicle, color: bool) -> Self {
        let pos = v.position.as_deref();
        Self {
            device: v.device.label().to_owned(),
            status: output::paint_status(v.status, color),
            speed: output::fmt_opt(pos.map(|p| format!("{:.1}", p.speed))),
            position: output::fmt_opt(
                pos.map(|p| format!("{:.5}, {:.5}", p.latitude, p.longitude)),
            ),
            updated: output::fmt_time(pos.and_then(fleetsync_core::Position::updated_at)),
            next: humantime::format_duration(v.adaptive_interval).to_string(),
        }
    }
}

fn summary(report: &CycleReport) -> String {
    let c = &report.counts;
    let elapsed = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();
    [
        format!("Job:        {}", report.job_id),
        format!(
            "Devices:    {}{}",
            report.devices,
            if report.devices_refreshed { " (refreshed)" } else { "" }
        ),
        format!(
            "Positions:  {} received, {} applied",
            report.positions_received, report.positions_applied
        ),
        format!(
            "Fleet:      {} total, {} moving, {} parked, {} offline",
            c.total, c.moving, c.parked, c.offline
        ),
        format!(
            "Took:       {}",
            humantime::format_duration(Duration::from_millis(
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            ))
        ),
        format!(
            "Next cycle: {}",
            humantime::format_duration(report.next_interval)
        ),
    ]
    .join("\n")
}

fn spinner(global: &GlobalOpts) -> ProgressBar {
    let interactive = matches!(global.output, OutputFormat::Table)
        && !global.quiet
        && std::io::stderr().is_terminal();
    if !interactive {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

pub async fn handle(config: SyncConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let bar = spinner(global);
    bar.set_message("authenticating");

    let result = FleetSync::oneshot(config, |sync| {
        let bar = bar.clone();
        async move {
            bar.set_message("syncing fleet");
            let report = sync.sync_once().await?;
            Ok(SyncOutput {
                report,
                vehicles: sync.tracking_state().vehicles,
            })
        }
    })
    .await;
    bar.finish_and_clear();
    let result = result?;

    let color = output::should_color(global.color);
    let out = match global.output {
        OutputFormat::Table => {
            let table = output::render_list(
                OutputFormat::Table,
                result.vehicles.as_slice(),
                |v| VehicleRow::new(v, color),
                |v| v.device.device_id.clone(),
            );
            format!("{}\n\n{table}", summary(&result.report))
        }
        format => output::render_single(format, &result, |r| summary(&r.report), |r| {
            r.report.job_id.to_string()
        }),
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
