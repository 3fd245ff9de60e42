// Last-known positions via `lastposition`.

use serde_json::json;
use tracing::debug;

use crate::auth::Session;
use crate::client::Gps51Client;
use crate::error::Error;
use crate::models::PositionBatch;

impl Gps51Client {
    /// Fetch the latest positions for `device_ids`.
    ///
    /// `since` is the provider cursor from a previous batch; `0` forces a
    /// full fetch. The returned batch echoes the cursor to use next time.
    pub async fn last_positions(
        &self,
        session: &Session,
        device_ids: &[String],
        since: i64,
    ) -> Result<PositionBatch, Error> {
        let body = json!({
            "deviceids": device_ids,
            "lastquerypositiontime": since,
        });

        let batch: PositionBatch = self
            .post_action("lastposition", Some(session), &body)
            .await?;

        debug!(
            requested = device_ids.len(),
            records = batch.records.len(),
            since,
            cursor = batch.last_query_time,
            "fetched positions"
        );
        Ok(batch)
    }
}
