//! Credential provider integration tests
//!
//! HTTP provider against a wiremock backend route, env provider against the
//! process environment.

use serial_test::serial;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tutorline::core::credentials::{
    CredentialProvider, EnvCredentialProvider, HttpCredentialProvider,
};
use tutorline::errors::CallError;

#[tokio::test]
async fn test_http_provider_reads_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/realtime-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "apiKey": "sk-from-backend",
            "length": 15
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        HttpCredentialProvider::new(format!("{}/api/realtime-key", server.uri())).unwrap();
    let credential = provider.fetch().await.unwrap();
    assert_eq!(credential.expose(), "sk-from-backend");
    assert_eq!(credential.bearer(), "Bearer sk-from-backend");
}

#[tokio::test]
async fn test_http_provider_server_error_is_not_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/realtime-key"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({ "error": "API key not configured" })),
        )
        .mount(&server)
        .await;

    let provider =
        HttpCredentialProvider::new(format!("{}/api/realtime-key", server.uri())).unwrap();
    assert!(matches!(
        provider.fetch().await,
        Err(CallError::NotConfigured(_))
    ));
}

#[tokio::test]
async fn test_http_provider_missing_key_is_not_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "length": 0 })))
        .mount(&server)
        .await;

    let provider = HttpCredentialProvider::new(server.uri()).unwrap();
    assert!(matches!(
        provider.fetch().await,
        Err(CallError::NotConfigured(_))
    ));
}

#[tokio::test]
async fn test_http_provider_undefined_key_is_not_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "apiKey": "undefined" })),
        )
        .mount(&server)
        .await;

    let provider = HttpCredentialProvider::new(server.uri()).unwrap();
    assert!(matches!(
        provider.fetch().await,
        Err(CallError::NotConfigured(_))
    ));
}

#[tokio::test]
async fn test_http_provider_bad_json_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let provider = HttpCredentialProvider::new(server.uri()).unwrap();
    assert!(matches!(
        provider.fetch().await,
        Err(CallError::ParseError(_))
    ));
}

#[tokio::test]
async fn test_http_provider_unreachable_is_connection_failed() {
    // Nothing listens on port 9 locally
    let provider = HttpCredentialProvider::new("http://127.0.0.1:9/api/realtime-key").unwrap();
    assert!(matches!(
        provider.fetch().await,
        Err(CallError::ConnectionFailed(_))
    ));
}

#[tokio::test]
#[serial]
async fn test_env_provider() {
    const VAR: &str = "TUTORLINE_TEST_API_KEY";
    let provider = EnvCredentialProvider::new(VAR);

    unsafe {
        std::env::remove_var(VAR);
    }
    assert!(matches!(
        provider.fetch().await,
        Err(CallError::NotConfigured(_))
    ));

    unsafe {
        std::env::set_var(VAR, "undefined");
    }
    assert!(matches!(
        provider.fetch().await,
        Err(CallError::NotConfigured(_))
    ));

    unsafe {
        std::env::set_var(VAR, "sk-env");
    }
    assert_eq!(provider.fetch().await.unwrap().expose(), "sk-env");

    unsafe {
        std::env::remove_var(VAR);
    }
}
