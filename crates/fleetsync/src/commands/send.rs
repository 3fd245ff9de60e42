//! `send`: queue a command for one device.

use serde::Serialize;

use fleetsync_core::{CommandReceipt, FleetSync, SyncConfig};

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct SendReport {
    device_id: String,
    command: String,
    params: Vec<String>,
    receipt: CommandReceipt,
}

fn command_id(r: &SendReport) -> String {
    r.receipt
        .command_id
        .as_ref()
        .map_or_else(|| "-".into(), |id| id.to_string().trim_matches('"').to_owned())
}

fn detail(r: &SendReport) -> String {
    [
        format!("Device:   {}", r.device_id),
        format!("Command:  {}", r.command),
        format!("Params:   {}", r.params.join(" ")),
        format!("Queued:   {}", command_id(r)),
    ]
    .join("\n")
}

pub async fn handle(config: SyncConfig, args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.device.trim().is_empty() {
        return Err(CliError::Validation {
            field: "device".into(),
            reason: "device ID cannot be empty".into(),
        });
    }

    let SendArgs {
        device,
        command,
        params,
    } = args;

    let (d, c, p) = (&device, &command, &params);
    let receipt =
        FleetSync::oneshot(config, |sync| async move { sync.send_command(d, c, p).await })
            .await?;
    tracing::info!(device_id = %device, command = %command, "command queued");

    let report = SendReport {
        device_id: device,
        command,
        params,
        receipt,
    };
    let out = output::render_single(global.output, &report, detail, command_id);
    output::print_output(&out, global.quiet);
    Ok(())
}
