//! `login`: authenticate once and show the session.

use serde::Serialize;

use fleetsync_core::{AuthState, FleetSync, SyncConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct LoginReport {
    username: String,
    api_url: String,
    state: AuthState,
    issued_at: Option<chrono::DateTime<chrono::Utc>>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn detail(r: &LoginReport) -> String {
    [
        format!("Username:  {}", r.username),
        format!("API:       {}", r.api_url),
        format!("State:     {}", r.state),
        format!("Issued:    {}", output::fmt_time(r.issued_at)),
        format!("Expires:   {}", output::fmt_time(r.expires_at)),
    ]
    .join("\n")
}

pub async fn handle(config: SyncConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let report = FleetSync::oneshot(config, |sync| async move {
        let session = sync.sessions().session();
        Ok(LoginReport {
            username: sync.config().credentials.username.clone(),
            api_url: sync.config().url.to_string(),
            state: sync.auth_state(),
            issued_at: session.as_ref().map(|s| s.issued_at),
            expires_at: session.and_then(|s| s.expires_at),
        })
    })
    .await?;

    let out = output::render_single(global.output, &report, detail, |r| r.username.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}
