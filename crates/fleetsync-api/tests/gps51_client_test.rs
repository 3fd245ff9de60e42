#![allow(clippy::unwrap_used)]
// Integration tests for `Gps51Client` using wiremock.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetsync_api::{Credentials, Error, Gps51Client, Password, PasswordHash, Session};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Gps51Client) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&format!("{}/openapi", server.uri())).unwrap();
    let client = Gps51Client::with_client(reqwest::Client::new(), base_url);
    (server, client)
}

fn session() -> Session {
    Session::new(SecretString::from("tok-1".to_string()), "fleet".into(), None)
}

fn plain_credentials(password: &str) -> Credentials {
    Credentials::new(
        "fleet",
        Password::Plain(SecretString::from(password.to_string())),
    )
}

// ── Authentication tests ────────────────────────────────────────────

#[tokio::test]
async fn test_login_sends_md5_and_returns_token() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/openapi"))
        .and(query_param("action", "login"))
        .and(body_partial_json(json!({
            "username": "fleet",
            "password": "5f4dcc3b5aa765d61d8327deb882cf99",
            "type": "USER",
            "from": "WEB",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 0,
            "cause": "OK",
            "token": "abc123",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client
        .login(&plain_credentials("password"), None)
        .await
        .unwrap();

    assert_eq!(session.token.expose_secret(), "abc123");
    assert_eq!(session.username, "fleet");
}

#[tokio::test]
async fn test_login_with_stored_hash_sends_it_unchanged() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(query_param("action", "login"))
        .and(body_partial_json(json!({
            "password": "5f4dcc3b5aa765d61d8327deb882cf99",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 0,
            "token": "hashed-ok",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let creds = Credentials::new(
        "fleet",
        Password::Hashed(PasswordHash::from_hex("5f4dcc3b5aa765d61d8327deb882cf99").unwrap()),
    );
    assert_ok!(client.login(&creds, None).await);
}

#[tokio::test]
async fn test_login_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(query_param("action", "login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 1,
            "cause": "username or password error",
        })))
        .mount(&server)
        .await;

    let result = client.login(&plain_credentials("wrong"), None).await;

    match result {
        Err(Error::Authentication { message }) => {
            assert_eq!(message, "username or password error");
        }
        other => panic!("expected Authentication error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_login_rate_limited_keeps_variant() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(query_param("action", "login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 8902,
            "cause": "request too frequent",
        })))
        .mount(&server)
        .await;

    let err = client
        .login(&plain_credentials("password"), None)
        .await
        .unwrap_err();
    assert!(err.is_rate_limited(), "got: {err:?}");
}

#[tokio::test]
async fn test_login_empty_credentials_never_hits_network() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = client.login(&plain_credentials(""), None).await;
    assert!(matches!(result, Err(Error::Authentication { .. })));
}

// ── Device tests ────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices_flattens_groups() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(query_param("action", "querymonitorlist"))
        .and(query_param("token", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 0,
            "groups": [
                {
                    "groupid": 1,
                    "groupname": "Lagos",
                    "devices": [
                        { "deviceid": "A1", "devicename": "Truck 1", "devicetype": 7, "lastactivetime": 1700000000000_i64 },
                        { "deviceid": "A2", "devicename": "Truck 2" }
                    ]
                },
                {
                    "groupid": 2,
                    "groupname": "Abuja",
                    "devices": [ { "deviceid": "B1", "devicename": "Van" } ]
                }
            ]
        })))
        .mount(&server)
        .await;

    let devices = client.list_devices(&session()).await.unwrap();

    assert_eq!(devices.len(), 3);
    assert_eq!(devices[0].device_id, "A1");
    assert_eq!(devices[0].device_type, 7);
    assert_eq!(devices[0].group_name.as_deref(), Some("Lagos"));
    assert_eq!(devices[2].group_name.as_deref(), Some("Abuja"));
}

// ── Position tests ──────────────────────────────────────────────────

#[tokio::test]
async fn test_last_positions_sends_cursor_and_returns_echo() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(query_param("action", "lastposition"))
        .and(body_partial_json(json!({
            "deviceids": ["A1"],
            "lastquerypositiontime": 1000,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 0,
            "lastquerypositiontime": 2500,
            "records": [{
                "deviceid": "A1",
                "callat": 6.5, "callon": 3.4,
                "speed": 12.0, "course": 90, "moving": 1,
                "updatetime": 2400
            }]
        })))
        .mount(&server)
        .await;

    let batch = client
        .last_positions(&session(), &["A1".to_string()], 1000)
        .await
        .unwrap();

    assert_eq!(batch.last_query_time, 2500);
    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.records[0].update_time, 2400);
    assert_eq!(batch.records[0].moving, 1);
}

#[tokio::test]
async fn test_token_rejection_is_session_expired() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(query_param("action", "lastposition"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 9903,
            "cause": "token invalid",
        })))
        .mount(&server)
        .await;

    let err = client
        .last_positions(&session(), &[], 0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionExpired));
    assert!(err.is_auth_expired());
}

// ── Transport tests ─────────────────────────────────────────────────

#[tokio::test]
async fn test_http_error_is_transport_class() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client.list_devices(&session()).await.unwrap_err();
    match &err {
        Error::Http { status, body } => {
            assert_eq!(*status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected Http error, got: {other:?}"),
    }
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_http_429_is_rate_limited() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client.list_devices(&session()).await.unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_malformed_body_keeps_raw_text() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.list_devices(&session()).await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "<html>oops</html>"),
        other => panic!("expected Deserialization error, got: {other:?}"),
    }
}

// ── Command tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_send_command() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(query_param("action", "setcommand"))
        .and(body_partial_json(json!({
            "deviceid": "A1",
            "command": "RELAY,1#",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 0,
            "commandid": "c-77",
        })))
        .mount(&server)
        .await;

    let receipt = client
        .send_command(&session(), "A1", "RELAY,1#", &[])
        .await
        .unwrap();
    assert_eq!(receipt.command_id, Some(json!("c-77")));
}
