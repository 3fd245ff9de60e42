// GPS51 HTTP client
//
// Wraps `reqwest::Client` with action-URL construction and reply-envelope
// unwrapping. Endpoint groups (login, devices, positions, commands) are
// inherent methods in separate files so this module stays focused on
// transport mechanics.

use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::auth::Session;
use crate::error::Error;
use crate::models::ProviderReply;
use crate::transport::TransportConfig;

/// Raw HTTP client for the GPS51 API.
///
/// Every call is a JSON `POST` to the base URL with the operation in the
/// `action` query parameter and, after login, the session `token`.
/// Methods return unwrapped payloads; a non-zero `status` becomes an
/// [`Error`].
#[derive(Debug, Clone)]
pub struct Gps51Client {
    http: reqwest::Client,
    base_url: Url,
}

impl Gps51Client {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the API endpoint, e.g. `https://api.gps51.com/openapi`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// `{base}?action={action}[&token={token}]`
    pub(crate) fn action_url(&self, action: &str, session: Option<&Session>) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("action", action);
            if let Some(session) = session {
                query.append_pair("token", session.token.expose_secret());
            }
        }
        url
    }

    // ── Request helper ───────────────────────────────────────────────

    /// POST a JSON body for `action` and unwrap the reply envelope.
    pub(crate) async fn post_action<T: DeserializeOwned>(
        &self,
        action: &str,
        session: Option<&Session>,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        let url = self.action_url(action, session);
        debug!(action, "POST {}", self.base_url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                status: i64::from(status.as_u16()),
                cause: text,
            });
        }
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        ProviderReply::<T>::parse(&text)?.into_result()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn action_url_carries_action_and_token() {
        let client = Gps51Client::with_client(
            reqwest::Client::new(),
            Url::parse("https://api.gps51.com/openapi").unwrap(),
        );
        let session = Session::new(SecretString::from("t0k".to_string()), "ops".into(), None);

        let login = client.action_url("login", None);
        assert_eq!(login.as_str(), "https://api.gps51.com/openapi?action=login");

        let list = client.action_url("querymonitorlist", Some(&session));
        assert_eq!(
            list.as_str(),
            "https://api.gps51.com/openapi?action=querymonitorlist&token=t0k"
        );
    }
}
