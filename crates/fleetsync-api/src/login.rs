// Session login/logout
//
// The login body carries the MD5 password digest; the reply carries the
// token every later call must send as a query parameter.

use chrono::Duration;
use secrecy::SecretString;
use serde_json::json;
use tracing::debug;

use crate::auth::{Credentials, Session};
use crate::client::Gps51Client;
use crate::error::Error;
use crate::models::LoginReply;

impl Gps51Client {
    /// Authenticate and return a new [`Session`].
    ///
    /// `ttl` is the local expiry assumption for the token; the provider
    /// does not report one. Provider rejections become
    /// [`Error::Authentication`], except rate-limit replies which keep
    /// their own variant so the caller can back off.
    pub async fn login(&self, creds: &Credentials, ttl: Option<Duration>) -> Result<Session, Error> {
        if creds.username.trim().is_empty() || creds.password.is_empty() {
            return Err(Error::Authentication {
                message: "username and password must not be empty".into(),
            });
        }

        let hash = creds.password.wire_hash();
        let body = json!({
            "type": creds.account_type.as_wire(),
            "from": creds.origin,
            "username": creds.username,
            "password": hash.as_str(),
            "browser": "fleetsync",
        });

        debug!(username = %creds.username, "logging in");

        let reply: LoginReply = match self.post_action("login", None, &body).await {
            Ok(reply) => reply,
            Err(Error::Provider { status, cause }) => {
                return Err(Error::Authentication {
                    message: if cause.is_empty() {
                        format!("login rejected (status {status})")
                    } else {
                        cause
                    },
                });
            }
            Err(Error::SessionExpired) => {
                return Err(Error::Authentication {
                    message: "login rejected by provider".into(),
                });
            }
            Err(e) => return Err(e),
        };

        if reply.token.is_empty() {
            return Err(Error::Authentication {
                message: "login reply carried an empty token".into(),
            });
        }

        debug!("login successful");
        Ok(Session::new(
            SecretString::from(reply.token),
            creds.username.clone(),
            ttl,
        ))
    }

    /// End the session on the provider side.
    pub async fn logout(&self, session: &Session) -> Result<(), Error> {
        debug!(username = %session.username, "logging out");
        let _: serde_json::Value = self
            .post_action("logout", Some(session), &json!({}))
            .await?;
        Ok(())
    }
}
