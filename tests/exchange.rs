use authcode_test::{
    auth::{AuthCodeClient, AuthCodeConfig, ExchangeError, Grant, ProbeError, Session},
    deps::oauth2::{AccessToken, AuthorizationCode, RefreshToken},
};
use reqwest::StatusCode;
use serde_json::json;
use wiremock::{
    matchers::{basic_auth, bearer_token, method, path},
    Mock, MockServer, ResponseTemplate,
};

const REDIRECT: &str = "http://localhost:8765/callback";

fn client(root: &str) -> AuthCodeClient {
    let config = AuthCodeConfig::new("client", "secret", REDIRECT, root).unwrap();
    AuthCodeClient::new(config, "openid").unwrap()
}

fn sent_form(request: &wiremock::Request) -> Vec<(String, String)> {
    url::form_urlencoded::parse(&request.body)
        .into_owned()
        .collect()
}

fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn tokens_session() -> Session {
    Session::from_tokens(
        AccessToken::new("at-1".into()),
        Some(RefreshToken::new("rt-1".into())),
    )
}

#[tokio::test]
async fn code_exchange_posts_exact_form_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(basic_auth("client", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3600,
            "id_token": "header.claims.sig",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let mut session = Session::new(AuthorizationCode::new("the-code".into()));
    client
        .exchange(&mut session, Grant::AuthorizationCode)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/x-www-form-urlencoded"
    );
    assert_eq!(
        sent_form(&requests[0]),
        pairs(&[
            ("grant_type", "authorization_code"),
            ("code", "the-code"),
            ("redirect_uri", REDIRECT),
            ("scope", "openid"),
        ])
    );

    assert!(session.auth_code().is_none());
    assert_eq!(session.access_token().unwrap().secret(), "at-1");
    assert_eq!(session.refresh_token().unwrap().secret(), "rt-1");
    assert_eq!(session.expires_in().unwrap().as_secs(), 3600);
    assert_eq!(session.id_token(), Some("header.claims.sig"));
}

#[tokio::test]
async fn refresh_exchange_replaces_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(basic_auth("client", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": 60
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let mut session = tokens_session();
    client
        .exchange_named(&mut session, "refresh")
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        sent_form(&requests[0]),
        pairs(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", "rt-1"),
            ("scope", "openid"),
        ])
    );

    assert_eq!(session.access_token().unwrap().secret(), "at-2");
    assert_eq!(session.refresh_token().unwrap().secret(), "rt-2");
    assert_eq!(session.expires_in().unwrap().as_secs(), 60);
}

#[tokio::test]
async fn rejected_exchange_leaves_session_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token expired"
        })))
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let mut session = tokens_session();
    let err = client
        .exchange(&mut session, Grant::RefreshToken)
        .await
        .unwrap_err();

    match err {
        ExchangeError::TokenExchangeFailed { status, body } => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.access_token().unwrap().secret(), "at-1");
    assert_eq!(session.refresh_token().unwrap().secret(), "rt-1");
}

#[tokio::test]
async fn malformed_token_body_leaves_session_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let mut session = tokens_session();
    let err = client
        .exchange(&mut session, Grant::RefreshToken)
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::Parse(_)));
    assert_eq!(session.access_token().unwrap().secret(), "at-1");
}

#[tokio::test]
async fn invalid_grant_sends_nothing() {
    let server = MockServer::start().await;
    let client = client(&server.uri());
    let mut session = tokens_session();

    let err = client
        .exchange_named(&mut session, "password")
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::InvalidGrantMethod(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_token_endpoint_is_a_transport_error() {
    // Nothing listens on the discard port.
    let client = client("http://127.0.0.1:9");
    let mut session = tokens_session();

    let err = client
        .exchange(&mut session, Grant::RefreshToken)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Transport(_)));

    let err = client.probe(&session).await.unwrap_err();
    assert!(matches!(err, ProbeError::Transport(_)));
}

async fn probe_with_status(status: u16) -> bool {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/echo/v2/ping"))
        .and(bearer_token("at-1"))
        .respond_with(ResponseTemplate::new(status).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    client(&server.uri())
        .probe(&tokens_session())
        .await
        .unwrap()
}

#[tokio::test]
async fn probe_is_true_only_for_200() {
    assert!(probe_with_status(200).await);
    assert!(!probe_with_status(201).await);
    assert!(!probe_with_status(401).await);
    assert!(!probe_with_status(403).await);
    assert!(!probe_with_status(500).await);
}
