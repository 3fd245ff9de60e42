// Device listing via `querymonitorlist`.

use serde_json::json;
use tracing::debug;

use crate::auth::Session;
use crate::client::Gps51Client;
use crate::error::Error;
use crate::models::{DeviceRecord, MonitorListReply};

impl Gps51Client {
    /// List every device visible to the account.
    ///
    /// The provider groups devices; the groups are flattened and each
    /// record keeps its group name.
    pub async fn list_devices(&self, session: &Session) -> Result<Vec<DeviceRecord>, Error> {
        let body = json!({ "username": session.username });
        let reply: MonitorListReply = self
            .post_action("querymonitorlist", Some(session), &body)
            .await?;

        let devices: Vec<DeviceRecord> = reply
            .groups
            .into_iter()
            .flat_map(|group| {
                let name = group.groupname;
                group.devices.into_iter().map(move |mut device| {
                    device.group_name.clone_from(&name);
                    device
                })
            })
            .collect();

        debug!(count = devices.len(), "listed devices");
        Ok(devices)
    }
}
