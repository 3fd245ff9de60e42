//! `watch`: run the polling engine until Ctrl-C.
//!
//! One status line per finished cycle in table mode; structured formats
//! emit one document per cycle (JSON lines for `json-compact`).

use std::fmt::Write;
use std::time::Duration;

use chrono::Local;

use fleetsync_core::{DegradationState, FleetSync, SyncConfig, TrackingIndicator, TrackingState};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::sync::VehicleRow;

fn parse_interval(raw: &str) -> Result<Duration, CliError> {
    let interval = humantime::parse_duration(raw.trim()).map_err(|e| CliError::Validation {
        field: "interval".into(),
        reason: e.to_string(),
    })?;
    if interval < Duration::from_secs(1) {
        return Err(CliError::Validation {
            field: "interval".into(),
            reason: "must be at least 1s".into(),
        });
    }
    Ok(interval)
}

fn status_line(state: &TrackingState, color: bool) -> String {
    let c = &state.counts;
    let mut line = format!(
        "[{}] {:<16} {} vehicles: {} moving, {} parked, {} offline  next {}",
        Local::now().format("%H:%M:%S"),
        output::paint_indicator(state.indicator, color),
        c.total,
        c.moving,
        c.parked,
        c.offline,
        humantime::format_duration(state.next_interval),
    );
    if state.skipped_ticks > 0 {
        let _ = write!(line, "  skipped {}", state.skipped_ticks);
    }
    if let Some(ref err) = state.last_error {
        let _ = write!(line, "\n    {err}");
    }
    line
}

fn render_state(state: &TrackingState, global: &GlobalOpts, color: bool) -> String {
    match global.output {
        OutputFormat::Table if global.verbose > 0 => {
            let table = output::render_list(
                OutputFormat::Table,
                state.vehicles.as_slice(),
                |v| VehicleRow::new(v, color),
                |v| v.device.device_id.clone(),
            );
            format!("{}\n{table}", status_line(state, color))
        }
        OutputFormat::Yaml => format!(
            "---\n{}",
            output::render_single(OutputFormat::Yaml, state, |_| String::new(), |_| {
                String::new()
            })
        ),
        format => output::render_single(format, state, |s| status_line(s, color), |s| {
            format!(
                "{}\t{}\t{}\t{}",
                s.indicator, s.counts.moving, s.counts.parked, s.counts.offline
            )
        }),
    }
}

fn degradation_line(state: &DegradationState, color: bool) -> String {
    format!(
        "[{}] service {} (health {}%), unavailable: {}",
        Local::now().format("%H:%M:%S"),
        output::paint_level(state.level, color),
        state.health_score,
        if state.disabled_features.is_empty() {
            "none".into()
        } else {
            state
                .disabled_features
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
    )
}

/// Print a finished cycle once; `Syncing` and `Idle` are transitions.
fn should_print(state: &TrackingState, last: Option<(u64, TrackingIndicator)>) -> bool {
    !matches!(
        state.indicator,
        TrackingIndicator::Syncing | TrackingIndicator::Idle
    ) && last != Some((state.cycles, state.indicator))
}

pub async fn handle(
    mut config: SyncConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(ref raw) = args.interval {
        config.polling.base_interval = parse_interval(raw)?;
    }
    if args.adaptive {
        config.polling.adaptive_scheduling = true;
    }

    let sync = FleetSync::new(config)?;
    sync.connect().await?;
    sync.start_tracking().await;

    let color = output::should_color(global.color);
    let table = matches!(global.output, OutputFormat::Table);
    if table && !global.quiet {
        eprintln!(
            "Watching {} (every {}{}); Ctrl-C to stop",
            sync.config().credentials.username,
            humantime::format_duration(sync.config().polling.base_interval),
            if sync.config().polling.adaptive_scheduling {
                ", adaptive"
            } else {
                ""
            }
        );
    }

    let mut tracking = sync.subscribe_tracking();
    let mut degradation = sync.subscribe_degradation();
    let mut last_level = degradation.borrow().level;
    let mut last_printed = None;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                }
                break;
            }
            changed = tracking.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = tracking.borrow_and_update().clone();
                if should_print(&state, last_printed) {
                    last_printed = Some((state.cycles, state.indicator));
                    output::print_output(&render_state(&state, global, color), global.quiet);
                }
            }
            changed = degradation.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = degradation.borrow_and_update().clone();
                if state.level != last_level {
                    last_level = state.level;
                    tracing::info!(
                        level = %state.level,
                        score = state.health_score,
                        "degradation level changed"
                    );
                    if table && !global.quiet {
                        eprintln!("{}", degradation_line(&state, color));
                    }
                }
            }
        }
    }

    if table && !global.quiet {
        eprintln!("Stopping...");
    }
    sync.disconnect().await;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn interval_accepts_humantime() {
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval(" 45s ").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn interval_rejects_sub_second_and_garbage() {
        assert!(parse_interval("500ms").is_err());
        assert!(parse_interval("often").is_err());
    }
}
