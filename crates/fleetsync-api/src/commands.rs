// Device commands via `setcommand`.

use serde_json::json;
use tracing::debug;

use crate::auth::Session;
use crate::client::Gps51Client;
use crate::error::Error;
use crate::models::CommandReceipt;

impl Gps51Client {
    /// Queue a command (e.g. engine cut-off, locate) for a device.
    pub async fn send_command(
        &self,
        session: &Session,
        device_id: &str,
        command: &str,
        params: &[String],
    ) -> Result<CommandReceipt, Error> {
        debug!(device_id, command, "sending device command");
        let body = json!({
            "deviceid": device_id,
            "command": command,
            "params": params,
        });
        self.post_action("setcommand", Some(session), &body).await
    }
}
