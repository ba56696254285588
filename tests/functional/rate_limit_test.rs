//! Functional tests for per-route rate limiting through the HTTP surface

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use resilient_gateway::{
    api::routes::create_router,
    backend::HttpUpstream,
    config::{BackendConfig, EndpointConfig, RateLimiterSettings, RouteConfig, Settings},
    gateway::{Gateway, StaticResolver},
    AppState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn create_test_app(backend: &MockServer, rate_limiter: RateLimiterSettings) -> Router {
    let mut settings = Settings::default();
    settings.gateway.backends = vec![BackendConfig {
        name: "CARDS".to_string(),
        endpoints: vec![EndpointConfig {
            url: backend.uri(),
            weight: 1,
        }],
    }];
    settings.gateway.routes = vec![RouteConfig {
        id: "cards".to_string(),
        path: "/eazybank/cards/**".to_string(),
        rewrite: "/${segment}".to_string(),
        uri: "lb://CARDS".to_string(),
        timeout_ms: 4_000,
        response_headers: Default::default(),
        fallback: None,
        circuit_breaker: None,
        retry: None,
        rate_limiter: Some(rate_limiter),
    }];

    let resolver = Arc::new(StaticResolver::from_config(&settings.gateway.backends));
    let upstream = Arc::new(HttpUpstream::new(Duration::from_secs(1)).unwrap());
    let gateway = Arc::new(Gateway::from_config(&settings.gateway, resolver, upstream).unwrap());

    create_router(Arc::new(AppState {
        settings: Arc::new(RwLock::new(settings)),
        gateway,
        config_path: PathBuf::from("config/default.toml"),
    }))
}

async fn mock_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_string("card details"))
        .mount(&server)
        .await;
    server
}

fn request(user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/eazybank/cards/api/fetch?mobileNumber=1234567890");
    if let Some(user) = user {
        builder = builder.header("user", user);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_rate_limit_allows_within_limit() {
    let backend = mock_backend().await;
    let app = create_test_app(
        &backend,
        RateLimiterSettings {
            capacity: 100,
            refill_per_second: 100.0,
            ..RateLimiterSettings::default()
        },
    )
    .await;

    for _ in 0..5 {
        let response = app.clone().oneshot(request(Some("rakesh"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let backend = mock_backend().await;
    let app = create_test_app(&backend, RateLimiterSettings::default()).await;

    let response = app.clone().oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "rate_limit_exceeded");

    // Only the admitted request reached the backend
    assert_eq!(backend.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rate_limit_refills() {
    let backend = mock_backend().await;
    let app = create_test_app(&backend, RateLimiterSettings::default()).await;

    assert_eq!(
        app.clone().oneshot(request(Some("rakesh"))).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(request(Some("rakesh"))).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    tokio::time::sleep(Duration::from_millis(1_050)).await;

    assert_eq!(
        app.clone().oneshot(request(Some("rakesh"))).await.unwrap().status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_rate_limit_is_keyed_by_user_header() {
    let backend = mock_backend().await;
    let app = create_test_app(&backend, RateLimiterSettings::default()).await;

    assert_eq!(
        app.clone().oneshot(request(Some("rakesh"))).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(request(Some("priya"))).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(request(None)).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(request(Some("rakesh"))).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_rate_limit_health_bypass() {
    let backend = mock_backend().await;
    let app = create_test_app(&backend, RateLimiterSettings::default()).await;

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_rate_limit_fallback_endpoint_bypass() {
    let backend = mock_backend().await;
    let app = create_test_app(&backend, RateLimiterSettings::default()).await;

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/contactSupport")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
