//! Functional tests for the HTTP upstream client against a mock backend

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use resilient_gateway::backend::{Endpoint, HttpUpstream, Upstream, UpstreamError, UpstreamRequest};
use resilient_gateway::config::{BackendConfig, EndpointConfig, GatewayConfig, RouteConfig};
use resilient_gateway::gateway::{Gateway, GatewayRequest, Outcome, StaticResolver};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream() -> HttpUpstream {
    HttpUpstream::new(Duration::from_secs(1)).unwrap()
}

fn get(path_and_query: &str) -> UpstreamRequest {
    UpstreamRequest {
        method: Method::GET,
        path_and_query: path_and_query.to_string(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

#[tokio::test]
async fn test_forwards_path_query_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/fetch"))
        .and(query_param("mobileNumber", "1234567890"))
        .and(header("eazybank-correlation-id", "abc-123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-backend", "accounts")
                .set_body_string("account"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut request = get("/api/fetch?mobileNumber=1234567890");
    request
        .headers
        .insert("eazybank-correlation-id", HeaderValue::from_static("abc-123"));

    let response = upstream()
        .send(&Endpoint::new(server.uri()), &request)
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get("x-backend").unwrap(), "accounts");
    assert_eq!(response.body, Bytes::from("account"));
}

#[tokio::test]
async fn test_forwards_body_and_method() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/create"))
        .and(body_string("{\"mobileNumber\":\"1234567890\"}"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let request = UpstreamRequest {
        method: Method::POST,
        body: Bytes::from("{\"mobileNumber\":\"1234567890\"}"),
        ..get("/api/create")
    };

    let response = upstream()
        .send(&Endpoint::new(server.uri()), &request)
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_hop_by_hop_headers_are_not_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user", "rakesh"))
        .and(|request: &wiremock::Request| {
            !request
                .headers
                .keys()
                .any(|name| name.as_str().eq_ignore_ascii_case("proxy-authorization"))
        })
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = get("/api/fetch");
    request
        .headers
        .insert("proxy-authorization", HeaderValue::from_static("secret"));
    request.headers.insert("host", HeaderValue::from_static("gateway:8072"));
    request.headers.insert("user", HeaderValue::from_static("rakesh"));

    let response = upstream()
        .send(&Endpoint::new(server.uri()), &request)
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_server_errors_are_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let response = upstream()
        .send(&Endpoint::new(server.uri()), &get("/api/fetch"))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_refused_connection_is_a_connect_error() {
    // Bind and drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let result = upstream()
        .send(&Endpoint::new(format!("http://127.0.0.1:{}", port)), &get("/"))
        .await;
    assert!(matches!(result, Err(UpstreamError::Connect(_, _))));
}

#[tokio::test]
async fn test_slow_backend_times_out_through_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let config = GatewayConfig {
        backends: vec![BackendConfig {
            name: "ACCOUNTS".to_string(),
            endpoints: vec![EndpointConfig {
                url: server.uri(),
                weight: 1,
            }],
        }],
        routes: vec![RouteConfig {
            id: "accounts".to_string(),
            path: "/eazybank/accounts/**".to_string(),
            rewrite: "/${segment}".to_string(),
            uri: "lb://ACCOUNTS".to_string(),
            timeout_ms: 100,
            response_headers: Default::default(),
            fallback: None,
            circuit_breaker: None,
            retry: None,
            rate_limiter: None,
        }],
        ..GatewayConfig::default()
    };
    let resolver = Arc::new(StaticResolver::from_config(&config.backends));
    let gateway = Gateway::from_config(&config, resolver, Arc::new(upstream())).unwrap();

    let response = gateway
        .handle(GatewayRequest::new(Method::GET, "/eazybank/accounts/api/fetch"))
        .await;

    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.outcome, Outcome::BackendFailure);
}
