//! Unit tests for configuration loading and validation

use resilient_gateway::config::Settings;
use resilient_gateway::gateway::LoadBalancingStrategy;
use resilient_gateway::resilience::retry::BackoffMode;
use resilient_gateway::GatewayError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const EAZYBANK: &str = r#"
[server]
host = "127.0.0.1"
port = 9072

[gateway]
load_balancing = "weighted_round_robin"

[[gateway.backends]]
name = "ACCOUNTS"
endpoints = [{ url = "http://localhost:8080", weight = 3 }, { url = "http://localhost:8081" }]

[[gateway.routes]]
id = "accounts"
path = "/eazybank/accounts/**"
uri = "lb://ACCOUNTS"
fallback = "/contactSupport"

[gateway.routes.circuit_breaker]
minimum_number_of_calls = 4
sliding_window_size = 4
wait_duration_in_open_state_ms = 1000

[[gateway.routes]]
id = "loans"
path = "/eazybank/loans/**"
uri = "lb://LOANS"

[gateway.routes.retry]
max_attempts = 3
backoff_mode = "initial"

[[gateway.routes]]
id = "cards"
path = "/eazybank/cards/**"
uri = "lb://CARDS"
timeout_ms = 2000

[gateway.routes.rate_limiter]
capacity = 5
refill_per_second = 2.5
"#;

#[test]
fn test_load_full_file() {
    let file = write_config(EAZYBANK);
    let settings = Settings::load_from_path(file.path()).unwrap();
    settings.validate().unwrap();

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 9072);
    assert_eq!(
        settings.gateway.load_balancing,
        LoadBalancingStrategy::WeightedRoundRobin
    );
    assert_eq!(settings.gateway.backends[0].endpoints[0].weight, 3);
    assert_eq!(settings.gateway.backends[0].endpoints[1].weight, 1);

    let routes = &settings.gateway.routes;
    assert_eq!(routes.len(), 3);
    assert_eq!(routes[0].rewrite, "/${segment}");
    assert_eq!(routes[0].timeout_ms, 4_000);

    let breaker = routes[0].circuit_breaker.as_ref().unwrap();
    assert_eq!(breaker.minimum_number_of_calls, 4);
    assert_eq!(breaker.failure_rate_threshold, 50.0);
    assert_eq!(breaker.permitted_calls_in_half_open_state, 2);

    let retry = routes[1].retry.as_ref().unwrap();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.backoff_mode, BackoffMode::Initial);
    assert_eq!(retry.methods, vec!["GET".to_string()]);

    let limiter = routes[2].rate_limiter.as_ref().unwrap();
    assert_eq!(limiter.capacity, 5);
    assert_eq!(limiter.key_header, "user");
    assert_eq!(limiter.default_key, "anonymous");
}

#[test]
fn test_defaults_when_file_missing() {
    let settings = Settings::load_from_path("does/not/exist.toml").unwrap();
    assert_eq!(settings.server.port, 8072);
    assert!(settings.gateway.routes.is_empty());
    assert_eq!(settings.gateway.fallbacks[0].path, "/contactSupport");
    assert_eq!(
        settings.gateway.correlation_header,
        "eazybank-correlation-id"
    );
}

#[test]
fn test_shipped_default_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
    let settings = Settings::load_from_path(path).unwrap();
    settings.validate().unwrap();

    let ids: Vec<_> = settings.gateway.routes.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["accounts", "loans", "cards"]);

    // Header keys may come back lowercased from the config loader
    let accounts = &settings.gateway.routes[0];
    let company = accounts
        .response_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Company-Name"))
        .map(|(_, value)| value.as_str());
    assert_eq!(company, Some("Rakesh Bank"));
}

fn validation_error(contents: &str) -> String {
    let file = write_config(contents);
    let settings = Settings::load_from_path(file.path()).unwrap();
    match settings.validate() {
        Err(GatewayError::Configuration(message)) => message,
        other => panic!("expected a configuration error, got {:?}", other),
    }
}

#[test]
fn test_rejects_malformed_predicate() {
    let message = validation_error(
        r#"
[[gateway.routes]]
id = "accounts"
path = "eazybank/accounts/**"
uri = "lb://ACCOUNTS"
"#,
    );
    assert!(message.contains("accounts"));
    assert!(message.contains("must start with '/'"));
}

#[test]
fn test_rejects_unknown_placeholder() {
    let message = validation_error(
        r#"
[[gateway.routes]]
id = "accounts"
path = "/eazybank/accounts/**"
rewrite = "/${path}"
uri = "lb://ACCOUNTS"
"#,
    );
    assert!(message.contains("placeholder"));
}

#[test]
fn test_rejects_bad_target() {
    let message = validation_error(
        r#"
[[gateway.routes]]
id = "accounts"
path = "/eazybank/accounts/**"
uri = "ftp://accounts"
"#,
    );
    assert!(message.contains("ftp://accounts"));
}

#[test]
fn test_rejects_invalid_breaker() {
    let message = validation_error(
        r#"
[[gateway.routes]]
id = "accounts"
path = "/eazybank/accounts/**"
uri = "lb://ACCOUNTS"

[gateway.routes.circuit_breaker]
sliding_window_size = 4
minimum_number_of_calls = 10
"#,
    );
    assert!(message.contains("minimum_number_of_calls"));
}

#[test]
fn test_rejects_zero_capacity_limiter() {
    let message = validation_error(
        r#"
[[gateway.routes]]
id = "cards"
path = "/eazybank/cards/**"
uri = "lb://CARDS"

[gateway.routes.rate_limiter]
capacity = 0
"#,
    );
    assert!(message.contains("capacity"));
}

#[test]
fn test_rejects_backend_without_endpoints() {
    let message = validation_error(
        r#"
[[gateway.backends]]
name = "ACCOUNTS"
endpoints = []
"#,
    );
    assert!(message.contains("ACCOUNTS"));
}

#[test]
fn test_rejects_unknown_log_format() {
    let message = validation_error(
        r#"
[logging]
format = "xml"
"#,
    );
    assert!(message.contains("xml"));
}
