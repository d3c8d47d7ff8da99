//! End-to-end tests: the proxy serving real HTTP in front of wiremock
//! Graphite backends.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;

use graphite_mux::{
    app::{AppState, router},
    config::Config,
};
use serde_json::Value;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{path, query_param},
};

const FIND_BODY: &str = r#"{"metrics": [
    {"is_leaf": 0, "name": "db01", "path": "collectd.db01."},
    {"is_leaf": 1, "name": "foo", "path": "collectd.foo"}
]}"#;

const EXPAND_BODY: &str = r#"["collectd.db01", "collectd.foo"]"#;

const RENDER_BODY: &str = r#"[{
    "target": "entries",
    "datapoints": [
        [1.0, 1311836008],
        [2.0, 1311836009],
        [3.0, 1311836010],
        [5.0, 1311836011],
        [6.0, 1311836012]
    ]
}]"#;

/// A canned graphite-web backend answering every API endpoint.
async fn mock_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(RENDER_BODY, "application/json"))
        .mount(&server)
        .await;
    for find_path in ["/metrics", "/metrics/find"] {
        Mock::given(path(find_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FIND_BODY, "application/json"))
            .mount(&server)
            .await;
    }
    Mock::given(path("/metrics/expand"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(EXPAND_BODY, "application/json"))
        .mount(&server)
        .await;
    server
}

fn config_for(mappings: BTreeMap<String, String>) -> Config {
    Config {
        address: None,
        mappings,
        insecure_https: false,
        ca_cert: None,
        ca_cert_dir: None,
        debug: false,
    }
}

async fn start_proxy(mappings: BTreeMap<String, String>) -> SocketAddr {
    let state = AppState::bootstrap(&config_for(mappings)).unwrap();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// dev/prod/stage environments, each backed by its own mock server.
async fn three_env_proxy() -> (SocketAddr, BTreeMap<String, MockServer>) {
    let mut servers = BTreeMap::new();
    let mut mappings = BTreeMap::new();
    for name in ["dev", "prod", "stage"] {
        let server = mock_backend().await;
        mappings.insert(name.to_string(), server.uri());
        servers.insert(name.to_string(), server);
    }
    (start_proxy(mappings).await, servers)
}

#[tokio::test]
async fn render_routes_to_single_backend() {
    let (addr, servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/render?target=stage.entries"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let targets = body.as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["target"], "stage.entries");
    assert_eq!(targets[0]["datapoints"].as_array().unwrap().len(), 5);

    assert_eq!(servers["stage"].received_requests().await.unwrap().len(), 1);
    assert!(servers["dev"].received_requests().await.unwrap().is_empty());
    assert!(servers["prod"].received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn render_strips_prefix_from_outbound_target() {
    let server = MockServer::start().await;
    Mock::given(path("/render"))
        .and(query_param("target", "servers.host1.loadavg.05"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(RENDER_BODY, "application/json"))
        .mount(&server)
        .await;
    let mappings = [("west".to_string(), server.uri())].into_iter().collect();
    let addr = start_proxy(mappings).await;

    let response = reqwest::get(format!(
        "http://{addr}/render?target=west.servers.host1.loadavg.05"
    ))
    .await
    .unwrap();
    // the mock only answers the prefix-stripped target
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn render_glob_prefix_fans_out_to_every_backend() {
    let (addr, _servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/render?target=*.entries"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let names: HashSet<String> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["target"].as_str().unwrap().to_string())
        .collect();
    let expected: HashSet<String> = ["dev.entries", "prod.entries", "stage.entries"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn render_post_forwards_form_parameters() {
    let (addr, servers) = three_env_proxy().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/render"))
        .form(&[("target", "stage.entries"), ("from", "-1h")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let received = servers["stage"].received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body = String::from_utf8(received[0].body.clone()).unwrap();
    assert!(body.contains("target=entries"), "{body}");
    assert!(body.contains("from=-1h"), "{body}");
}

#[tokio::test]
async fn find_merges_and_prefixes_every_backend() {
    let (addr, servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/metrics?query=*.collectd.*"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let metrics = body["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 6);
    for node in metrics {
        let path = node["path"].as_str().unwrap();
        assert!(
            path.starts_with("dev.collectd.")
                || path.starts_with("prod.collectd.")
                || path.starts_with("stage.collectd."),
            "unexpected path {path}"
        );
    }

    // every backend saw the prefix-stripped pattern
    for server in servers.values() {
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let query = received[0].url.query().unwrap();
        assert!(query.contains("query=collectd.*"), "{query}");
    }
}

#[tokio::test]
async fn find_empty_query_lists_backends_without_io() {
    let (addr, servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/metrics/find?query="))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let metrics = body["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 3);
    for (node, name) in metrics.iter().zip(["dev", "prod", "stage"]) {
        assert_eq!(node["is_leaf"], 0);
        assert_eq!(node["name"], name);
        assert_eq!(node["path"], format!("{name}."));
    }
    for server in servers.values() {
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn find_star_query_lists_backends_without_io() {
    let (addr, servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/metrics/find?query=*"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["metrics"].as_array().unwrap().len(), 3);
    for server in servers.values() {
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn expand_merges_and_prefixes() {
    let (addr, _servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/metrics/expand?query=dev.collectd.*"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!(["dev.collectd.db01", "dev.collectd.foo"])
    );
}

#[tokio::test]
async fn expand_empty_query_lists_backend_names() {
    let (addr, _servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/metrics/expand?query="))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!(["dev", "prod", "stage"]));
}

#[tokio::test]
async fn unmatched_prefix_is_not_found() {
    let (addr, _servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/metrics?query=nosuch.collectd.*"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = reqwest::get(format!("http://{addr}/render?target=nosuch.entries"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn invalid_queries_are_bad_requests() {
    let (addr, _servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/render?target=alias(dev.entries"))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // /metrics only accepts a plain metric pattern
    let response = reqwest::get(format!(
        "http://{addr}/metrics?query=alias(dev.entries,%20'x')"
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let (addr, _servers) = three_env_proxy().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/metrics?query=dev.collectd.*"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (addr, _servers) = three_env_proxy().await;
    let response = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn unreachable_backends_yield_unavailable() {
    // nothing listens on port 1
    let mappings = [("dev".to_string(), "http://127.0.0.1:1/".to_string())]
        .into_iter()
        .collect();
    let addr = start_proxy(mappings).await;
    let response = reqwest::get(format!("http://{addr}/render?target=dev.entries"))
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn failing_backend_response_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(path("/render"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    let mappings = [("dev".to_string(), server.uri())].into_iter().collect();
    let addr = start_proxy(mappings).await;

    let response = reqwest::get(format!("http://{addr}/render?target=dev.entries"))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "upstream exploded");
}

#[tokio::test]
async fn mixed_prefix_query_routes_to_last_prefix() {
    let (addr, servers) = three_env_proxy().await;
    let response = reqwest::get(format!(
        "http://{addr}/render?target=sumSeries(dev.cpu,%20prod.cpu)"
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(servers["prod"].received_requests().await.unwrap().len(), 1);
    assert!(servers["dev"].received_requests().await.unwrap().is_empty());
}
