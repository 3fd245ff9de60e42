#![allow(clippy::unwrap_used)]
// Profile loading, credential resolution and SyncConfig translation.

use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use fleetsync_config::{
    Config, ConfigError, CredentialSource, CredentialStatus, CredentialStore, Defaults, Profile,
    load_config_from, profile_to_sync_config, save_config_to,
};
use fleetsync_core::{AccountType, Password, TlsVerification};

const PASSWORD_MD5: &str = "5f4dcc3b5aa765d61d8327deb882cf99";

fn profile() -> Profile {
    Profile {
        username: Some("fleet".into()),
        password: Some("password".into()),
        ..Profile::default()
    }
}

fn wire_hash(password: &Password) -> String {
    password.wire_hash().as_str().to_owned()
}

// ── Files ───────────────────────────────────────────────────────────
//
// Loading reads `FLEETSYNC_*` env vars, so every load runs inside a figment
// jail to stay isolated from the other tests.

#[test]
fn test_save_then_load_preserves_profiles() {
    figment::Jail::expect_with(|jail| {
        let path = jail.directory().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.default_profile = Some("depot".into());
        cfg.profiles.insert(
            "depot".into(),
            Profile {
                password_hash: Some(PASSWORD_MD5.into()),
                password: None,
                account_type: AccountType::Device,
                poll_interval: Some(45),
                ..profile()
            },
        );

        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded, cfg);
        Ok(())
    });
}

#[test]
fn test_missing_file_yields_defaults() {
    figment::Jail::expect_with(|_| {
        let loaded = load_config_from(Path::new("absent.toml")).unwrap();

        assert_eq!(loaded.default_profile.as_deref(), Some("default"));
        assert_eq!(loaded.defaults, Defaults::default());
        assert!(loaded.profiles.is_empty());
        Ok(())
    });
}

#[test]
fn test_partial_profile_gets_field_defaults() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            "[profiles.default]\nusername = \"fleet\"\npassword = \"password\"\n",
        )?;

        let loaded = load_config_from(Path::new("config.toml")).unwrap();
        let p = loaded.profile("default").unwrap();

        assert_eq!(p.api_url, "https://api.gps51.com/openapi");
        assert_eq!(p.origin, "WEB");
        assert_eq!(p.account_type, AccountType::User);
        Ok(())
    });
}

#[test]
fn test_env_overrides_nested_defaults() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[defaults]\ntimeout = 30\n")?;
        jail.set_env("FLEETSYNC_DEFAULTS__TIMEOUT", "5");

        let cfg = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
        assert_eq!(cfg.defaults.timeout, 5);
        Ok(())
    });
}

#[test]
fn test_unknown_profile_is_named() {
    let err = Config::default().profile("nope").unwrap_err();
    assert_eq!(err.to_string(), "profile 'nope' not found");
}

#[test]
fn test_active_profile_precedence() {
    let mut cfg = Config::default();
    assert_eq!(cfg.active_profile_name(None), "default");
    cfg.default_profile = Some("depot".into());
    assert_eq!(cfg.active_profile_name(None), "depot");
    assert_eq!(cfg.active_profile_name(Some("night")), "night");
}

// ── Credential chain ────────────────────────────────────────────────

#[test]
fn test_env_password_beats_profile() {
    let store =
        CredentialStore::isolated().with_env_password(SecretString::from("other".to_string()));
    let (password, source) = store.resolve_password(&profile(), "default").unwrap();

    assert_eq!(source, CredentialSource::Environment);
    assert!(matches!(password, Password::Plain(_)));
}

#[test]
fn test_profile_hash_beats_plaintext() {
    let store = CredentialStore::isolated();
    let p = Profile {
        password_hash: Some(PASSWORD_MD5.to_uppercase()),
        password: Some("ignored".into()),
        ..profile()
    };

    let (password, source) = store.resolve_password(&p, "default").unwrap();

    assert_eq!(source, CredentialSource::ConfigHash);
    assert_eq!(wire_hash(&password), PASSWORD_MD5);
}

#[test]
fn test_plaintext_is_hashed_once_at_the_wire() {
    let store = CredentialStore::isolated();
    let (password, source) = store.resolve_password(&profile(), "default").unwrap();

    assert_eq!(source, CredentialSource::ConfigPlaintext);
    assert_eq!(wire_hash(&password), PASSWORD_MD5);
}

#[test]
fn test_malformed_hash_is_a_validation_error() {
    let store = CredentialStore::isolated();
    let p = Profile {
        password_hash: Some("not-a-digest".into()),
        ..profile()
    };

    let err = store.resolve_password(&p, "default").unwrap_err();
    assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "password_hash"));
}

#[test]
fn test_status_lists_everything_missing() {
    let store = CredentialStore::isolated();
    let p = Profile {
        api_url: "not a url".into(),
        ..Profile::default()
    };

    assert_eq!(
        store.status(&p, "default"),
        CredentialStatus::NotConfigured {
            missing: vec!["api_url", "username", "password"],
        }
    );
    assert!(store.status(&profile(), "default").is_configured());
}

#[test]
fn test_keyring_disabled_store_refuses_writes() {
    let store = CredentialStore::isolated();
    let hash = fleetsync_core::PasswordHash::from_hex(PASSWORD_MD5).unwrap();

    assert!(matches!(
        store.store_hash("default", &hash),
        Err(ConfigError::KeyringDisabled)
    ));
    assert!(store.keyring_hash("default").is_none());
}

// ── SyncConfig translation ──────────────────────────────────────────

#[test]
fn test_profile_to_sync_config_applies_overrides() {
    let store = CredentialStore::isolated();
    let p = Profile {
        timeout: Some(10),
        poll_interval: Some(20),
        adaptive: Some(true),
        origin: "APP".into(),
        ..profile()
    };

    let cfg = profile_to_sync_config(&p, "default", &Defaults::default(), &store).unwrap();

    assert_eq!(cfg.url.as_str(), "https://api.gps51.com/openapi");
    assert_eq!(cfg.credentials.username, "fleet");
    assert_eq!(cfg.credentials.origin, "APP");
    assert_eq!(cfg.tls, TlsVerification::SystemDefaults);
    assert_eq!(cfg.timeout, Duration::from_secs(10));
    assert_eq!(cfg.polling.base_interval, Duration::from_secs(20));
    assert!(cfg.polling.adaptive_scheduling);
}

#[test]
fn test_insecure_default_applies_without_profile_override() {
    let store = CredentialStore::isolated();
    let defaults = Defaults {
        insecure: true,
        ..Defaults::default()
    };

    let cfg = profile_to_sync_config(&profile(), "default", &defaults, &store).unwrap();
    assert_eq!(cfg.tls, TlsVerification::DangerAcceptInvalid);
}

#[test]
fn test_missing_username_is_reported() {
    let store = CredentialStore::isolated();
    let p = Profile {
        username: None,
        ..profile()
    };

    let err = profile_to_sync_config(&p, "depot", &Defaults::default(), &store).unwrap_err();
    assert_eq!(err.to_string(), "profile 'depot' is missing: username");
}
