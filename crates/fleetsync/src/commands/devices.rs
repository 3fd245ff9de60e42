//! `devices`: list the account's devices.

use tabled::Tabled;

use fleetsync_core::{Device, FleetSync, SyncConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    device_type: i64,
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Last Active")]
    last_active: String,
}

impl From<&Device> for DeviceRow {
    fn from(d: &Device) -> Self {
        Self {
            id: d.device_id.clone(),
            name: d.label().to_owned(),
            device_type: d.device_type,
            group: d.group_name.clone().unwrap_or_default(),
            last_active: output::fmt_time(d.last_active),
        }
    }
}

pub async fn handle(config: SyncConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = FleetSync::oneshot(config, |sync| async move { sync.list_devices().await }).await?;

    let out = output::render_list(global.output, &devices, |d| DeviceRow::from(d), |d| {
        d.device_id.clone()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
