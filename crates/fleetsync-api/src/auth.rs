use std::fmt;

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Which kind of account the credentials belong to.
///
/// Sent verbatim as the `type` field of the login body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    #[default]
    User,
    Device,
}

impl AccountType {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Device => "DEVICE",
        }
    }
}

/// MD5 digest of a password, lowercase hex, as the provider expects it.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash a plaintext password.
    pub fn from_plain(password: &SecretString) -> Self {
        let digest = Md5::digest(password.expose_secret().as_bytes());
        Self(hex::encode(digest))
    }

    /// Accept a digest that was hashed earlier (keyring, config file).
    ///
    /// Uppercase hex is normalized; anything that is not 32 hex digits is rejected.
    pub fn from_hex(value: &str) -> Result<Self, Error> {
        let trimmed = value.trim();
        if trimmed.len() != 32 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Authentication {
                message: "stored password hash is not a 32-character hex digest".into(),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(****)")
    }
}

/// A password in whichever form the credential source provided it.
///
/// Hashing happens exactly once: `Plain` is digested at the wire boundary,
/// `Hashed` is sent as is.
#[derive(Debug, Clone)]
pub enum Password {
    Plain(SecretString),
    Hashed(PasswordHash),
}

impl Password {
    /// The value that goes into the login body.
    pub fn wire_hash(&self) -> PasswordHash {
        match self {
            Self::Plain(secret) => PasswordHash::from_plain(secret),
            Self::Hashed(hash) => hash.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Plain(secret) => secret.expose_secret().is_empty(),
            Self::Hashed(hash) => hash.0.is_empty(),
        }
    }
}

/// Everything needed to log in.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Password,
    /// The `from` tag the provider records for the login (e.g. `WEB`).
    pub origin: String,
    pub account_type: AccountType,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Password) -> Self {
        Self {
            username: username.into(),
            password,
            origin: "WEB".into(),
            account_type: AccountType::User,
        }
    }
}

/// An authenticated session. The token is required on every call after login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SecretString,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(token: SecretString, username: String, ttl: Option<Duration>) -> Self {
        let issued_at = Utc::now();
        Self {
            token,
            username,
            issued_at,
            expires_at: ttl.map(|ttl| issued_at + ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_vectors() {
        let hash = PasswordHash::from_plain(&SecretString::from("password".to_string()));
        assert_eq!(hash.as_str(), "5f4dcc3b5aa765d61d8327deb882cf99");

        let empty = PasswordHash::from_plain(&SecretString::from(String::new()));
        assert_eq!(empty.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn hashed_password_is_not_hashed_again() {
        let stored = PasswordHash::from_hex("5F4DCC3B5AA765D61D8327DEB882CF99").unwrap();
        let password = Password::Hashed(stored);
        assert_eq!(
            password.wire_hash().as_str(),
            "5f4dcc3b5aa765d61d8327deb882cf99"
        );
    }

    #[test]
    fn from_hex_rejects_non_digests() {
        assert!(PasswordHash::from_hex("password").is_err());
        assert!(PasswordHash::from_hex("zz4dcc3b5aa765d61d8327deb882cf99").is_err());
    }

    #[test]
    fn debug_output_redacts_hash() {
        let hash = PasswordHash::from_plain(&SecretString::from("secret".to_string()));
        assert_eq!(format!("{hash:?}"), "PasswordHash(****)");
    }

    #[test]
    fn session_expiry() {
        let session = Session::new(
            SecretString::from("tok".to_string()),
            "fleet".into(),
            Some(Duration::hours(1)),
        );
        assert!(!session.is_expired());
        assert!(session.is_expired_at(session.issued_at + Duration::hours(2)));

        let forever = Session::new(SecretString::from("tok".to_string()), "fleet".into(), None);
        assert!(!forever.is_expired_at(forever.issued_at + Duration::days(365)));
    }
}
