//! End-to-end tests over the HTTP front-end: cache headers, statistics
//! endpoints, error mapping, and pass-through.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use heimdall::{Config, Proxy};

/// Serve a proxy over an ephemeral port, returning its base URL.
async fn spawn_proxy(config: Config) -> (String, Proxy) {
    let proxy = Proxy::builder(config).build();
    let app = heimdall::server::router(proxy.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), proxy)
}

fn config_for(backend: &str) -> Config {
    Config::from_toml(&format!(
        r#"
        [backend]
        url = "{backend}"

        [cache]
        default_ttl_secs = 60
        default_stale_secs = 60
        "#
    ))
    .unwrap()
}

#[tokio::test]
async fn get_is_miss_then_hit() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"a\":1}")
                .insert_header("content-type", "application/json"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, _proxy) = spawn_proxy(config_for(&upstream.uri())).await;
    let client = reqwest::Client::new();

    let first = client.get(format!("{base}/api/data")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-cache-status"], "MISS");
    assert!(first.headers().contains_key("x-cache-timestamp"));
    assert_eq!(first.headers()["content-type"], "application/json");
    assert_eq!(first.text().await.unwrap(), "{\"a\":1}");

    let second = client.get(format!("{base}/api/data")).send().await.unwrap();
    assert_eq!(second.headers()["x-cache-status"], "HIT");
    assert_eq!(second.text().await.unwrap(), "{\"a\":1}");
}

#[tokio::test]
async fn cache_clear_resets_entries() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(2)
        .mount(&upstream)
        .await;

    let (base, _proxy) = spawn_proxy(config_for(&upstream.uri())).await;
    let client = reqwest::Client::new();

    client.get(format!("{base}/api/data")).send().await.unwrap();

    let cleared = client
        .post(format!("{base}/cache/clear"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = cleared.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "success": true }));

    // Next GET misses again, reaching the upstream a second time.
    let response = client.get(format!("{base}/api/data")).send().await.unwrap();
    assert_eq!(response.headers()["x-cache-status"], "MISS");
}

#[tokio::test]
async fn stats_endpoints_serve_snapshots() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"a\":1}"))
        .mount(&upstream)
        .await;

    let (base, _proxy) = spawn_proxy(config_for(&upstream.uri())).await;
    let client = reqwest::Client::new();

    client.get(format!("{base}/api/data")).send().await.unwrap();
    client.get(format!("{base}/api/data")).send().await.unwrap();

    let cache_stats: serde_json::Value = client
        .get(format!("{base}/cache/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cache_stats["size"], 1);
    let entry = &cache_stats["entries"]["/api/data"];
    assert_eq!(entry["hits"], 1);
    assert_eq!(entry["misses"], 1);
    assert_eq!(entry["payload_size"], 7);
    assert_eq!(cache_stats["error_rate"], 0.0);

    let queue_stats: serde_json::Value = client
        .get(format!("{base}/queue/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(queue_stats["max_concurrent"], 2);
    assert_eq!(queue_stats["queue_length"], 0);
    assert_eq!(queue_stats["recently_completed"][0]["url"], "/api/data");
    assert_eq!(queue_stats["recently_completed"][0]["success"], true);
}

#[tokio::test]
async fn health_reports_composed_status() {
    let upstream = MockServer::start().await;
    let (base, _proxy) = spawn_proxy(config_for(&upstream.uri())).await;

    let health: serde_json::Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["cache_size"], 0);
    assert!(health["version"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn unreachable_upstream_maps_to_503_when_cache_is_empty() {
    // Nothing listens on port 1.
    let (base, _proxy) = spawn_proxy(config_for("http://127.0.0.1:1")).await;

    let response = reqwest::get(format!("{base}/api/data")).await.unwrap();
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("HTTP error"));
}

#[tokio::test]
async fn unreachable_upstream_serves_stale_when_cached() {
    let (base, proxy) = spawn_proxy(config_for("http://127.0.0.1:1")).await;
    proxy.store("/api/data", "{\"old\":true}".into(), vec![]);

    let response = reqwest::get(format!("{base}/api/data")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache-status"], "HIT");
    assert_eq!(response.text().await.unwrap(), "{\"old\":true}");
}

#[tokio::test]
async fn validation_rejection_maps_to_500() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&upstream)
        .await;

    let config = Config::from_toml(&format!(
        r#"
        [backend]
        url = "{}"

        [validation]
        require_json_object = ["/api/status"]
        "#,
        upstream.uri()
    ))
    .unwrap();
    let (base, _proxy) = spawn_proxy(config).await;

    let response = reqwest::get(format!("{base}/api/status")).await.unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn non_get_is_forwarded_and_never_cached() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/submit"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(2)
        .mount(&upstream)
        .await;

    let (base, _proxy) = spawn_proxy(config_for(&upstream.uri())).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .post(format!("{base}/api/submit"))
            .body("data")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        assert!(!response.headers().contains_key("x-cache-status"));
        assert_eq!(response.text().await.unwrap(), "created");
    }
}

#[tokio::test]
async fn cached_4xx_is_replayed() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, _proxy) = spawn_proxy(config_for(&upstream.uri())).await;
    let client = reqwest::Client::new();

    let first = client.get(format!("{base}/gone")).send().await.unwrap();
    assert_eq!(first.status(), 404);
    let second = client.get(format!("{base}/gone")).send().await.unwrap();
    assert_eq!(second.status(), 404);
    assert_eq!(second.headers()["x-cache-status"], "HIT");
}
