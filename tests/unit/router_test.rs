//! Unit tests for route table construction and path matching

use resilient_gateway::config::{GatewayConfig, RouteConfig};
use resilient_gateway::gateway::route::Target;
use resilient_gateway::gateway::{RouteTable, Router};

fn route(id: &str, path: &str, uri: &str) -> RouteConfig {
    RouteConfig {
        id: id.to_string(),
        path: path.to_string(),
        rewrite: "/${segment}".to_string(),
        uri: uri.to_string(),
        timeout_ms: 4_000,
        response_headers: Default::default(),
        fallback: None,
        circuit_breaker: None,
        retry: None,
        rate_limiter: None,
    }
}

fn eazybank() -> GatewayConfig {
    GatewayConfig {
        routes: vec![
            route("accounts", "/eazybank/accounts/**", "lb://ACCOUNTS"),
            route("loans", "/eazybank/loans/**", "lb://LOANS"),
            route("cards", "/eazybank/cards/**", "lb://CARDS"),
        ],
        ..GatewayConfig::default()
    }
}

#[test]
fn test_rewrite_keeps_query_string() {
    let router = Router::new(RouteTable::from_config(&eazybank()).unwrap());

    let matched = router
        .route("/eazybank/accounts/api/fetch?mobileNumber=1234567890")
        .unwrap();

    assert_eq!(matched.route.id, "accounts");
    assert_eq!(matched.rewritten_path, "/api/fetch?mobileNumber=1234567890");
    assert_eq!(
        matched.route.target,
        Target::LoadBalanced("ACCOUNTS".to_string())
    );
}

#[test]
fn test_bare_prefix_rewrites_to_root() {
    let router = Router::new(RouteTable::from_config(&eazybank()).unwrap());
    assert_eq!(router.route("/eazybank/loans").unwrap().rewritten_path, "/");
}

#[test]
fn test_no_match() {
    let router = Router::new(RouteTable::from_config(&eazybank()).unwrap());
    assert!(router.route("/eazybank/orders/api").is_none());
    assert!(router.route("/eazybank/cardsx/api").is_none());
    assert!(router.route("/").is_none());
}

#[test]
fn test_first_registered_route_wins() {
    let config = GatewayConfig {
        routes: vec![
            route("specific", "/eazybank/accounts/api/**", "lb://AUDIT"),
            route("accounts", "/eazybank/accounts/**", "lb://ACCOUNTS"),
        ],
        ..GatewayConfig::default()
    };
    let router = Router::new(RouteTable::from_config(&config).unwrap());

    let matched = router.route("/eazybank/accounts/api/fetch").unwrap();
    assert_eq!(matched.route.id, "specific");
    assert_eq!(matched.rewritten_path, "/fetch");

    let matched = router.route("/eazybank/accounts/health").unwrap();
    assert_eq!(matched.route.id, "accounts");
}

#[test]
fn test_custom_rewrite_template() {
    let config = GatewayConfig {
        routes: vec![RouteConfig {
            rewrite: "/v2/${segment}".to_string(),
            ..route("accounts", "/eazybank/accounts/**", "http://localhost:8080")
        }],
        ..GatewayConfig::default()
    };
    let router = Router::new(RouteTable::from_config(&config).unwrap());

    let matched = router.route("/eazybank/accounts/api/fetch").unwrap();
    assert_eq!(matched.rewritten_path, "/v2/api/fetch");
    assert_eq!(
        matched.route.target,
        Target::Direct("http://localhost:8080".to_string())
    );
}

#[test]
fn test_duplicate_route_ids_rejected() {
    let config = GatewayConfig {
        routes: vec![
            route("accounts", "/eazybank/accounts/**", "lb://ACCOUNTS"),
            route("accounts", "/eazybank/loans/**", "lb://LOANS"),
        ],
        ..GatewayConfig::default()
    };
    let err = RouteTable::from_config(&config).unwrap_err();
    assert!(err.to_string().contains("duplicate route id"));
}

#[test]
fn test_unknown_fallback_rejected() {
    let config = GatewayConfig {
        routes: vec![RouteConfig {
            fallback: Some("/missing".to_string()),
            ..route("accounts", "/eazybank/accounts/**", "lb://ACCOUNTS")
        }],
        ..GatewayConfig::default()
    };
    assert!(RouteTable::from_config(&config).is_err());
}

#[test]
fn test_identical_table_gives_identical_decisions() {
    let router = Router::new(RouteTable::from_config(&eazybank()).unwrap());
    let paths = [
        "/eazybank/accounts/api/fetch?mobileNumber=1",
        "/eazybank/loans/api/fetch",
        "/eazybank/cards",
        "/eazybank/unknown",
    ];
    let decide = |router: &Router| {
        paths
            .iter()
            .map(|p| router.route(p).map(|m| (m.route.id.clone(), m.rewritten_path)))
            .collect::<Vec<_>>()
    };

    let before = decide(&router);
    let previous = router.replace(RouteTable::from_config(&eazybank()).unwrap());
    let after = decide(&router);

    assert_eq!(before, after);
    assert_eq!(previous.routes().len(), router.snapshot().routes().len());
    for (old, new) in previous.routes().iter().zip(router.snapshot().routes()) {
        assert_eq!(**old, **new);
    }
}

#[test]
fn test_snapshot_is_stable_across_replace() {
    let router = Router::new(RouteTable::from_config(&eazybank()).unwrap());
    let snapshot = router.snapshot();

    router.replace(RouteTable::from_config(&GatewayConfig::default()).unwrap());

    assert_eq!(snapshot.len(), 3);
    assert!(router.snapshot().is_empty());
    assert!(router.route("/eazybank/accounts/api").is_none());
}
