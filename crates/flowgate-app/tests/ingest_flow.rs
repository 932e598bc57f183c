//! 분석 서비스 엔드투엔드 테스트.
//!
//! 실제 리스너를 띄우고 HTTP로 인제스트 → 집계 조회 흐름을 검증한다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use flowgate_analytics::{api_routes, AppState};
use flowgate_cache::MemoryKvStore;
use flowgate_core::config::AnalyticsConfig;
use flowgate_storage::SqliteEventStore;

/// 분석 앱을 임시 포트에 기동
async fn spawn_analytics(state: AppState) -> SocketAddr {
    let app = api_routes(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn make_state() -> AppState {
    let kv = Arc::new(MemoryKvStore::new());
    let store = Arc::new(SqliteEventStore::open_in_memory().unwrap());
    AppState::new(&AnalyticsConfig::default(), kv, store)
}

fn record_json(request_id: &str, status: u16, latency: u64) -> serde_json::Value {
    json!({
        "requestId": request_id,
        "path": "/api/users",
        "method": "GET",
        "statusCode": status,
        "latencyMs": latency,
        "clientId": "abcdefgh",
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// 집계가 나타날 때까지 폴링
async fn poll_aggregated(
    client: &reqwest::Client,
    addr: SocketAddr,
    deadline: Duration,
) -> Vec<serde_json::Value> {
    let start = std::time::Instant::now();
    loop {
        let aggregates: Vec<serde_json::Value> = client
            .get(format!("http://{addr}/api/v1/metrics/aggregated"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !aggregates.is_empty() || start.elapsed() > deadline {
            return aggregates;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn batch_ingest_surfaces_aggregate_quickly() {
    let state = make_state();
    let _sink_handles = state.sink.start(2);
    let addr = spawn_analytics(state).await;
    let client = reqwest::Client::new();

    // 같은 키로 성공 1건 + 에러 1건
    let batch = json!([
        record_json("req-1", 200, 50),
        record_json("req-2", 500, 120),
    ]);
    let resp = client
        .post(format!("http://{addr}/api/v1/telemetry/ingest/batch"))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    // 500ms 안에 집계가 나타나야 한다
    let aggregates = poll_aggregated(&client, addr, Duration::from_millis(500)).await;
    assert_eq!(aggregates.len(), 1);

    let agg = &aggregates[0];
    assert_eq!(agg["endpoint"], "/api/users");
    assert_eq!(agg["method"], "GET");
    assert_eq!(agg["requestCount"], 2);
    assert_eq!(agg["errorCount"], 1);
    assert_eq!(agg["successCount"], 1);
    assert_eq!(agg["errorRate"], 50.0);
    assert_eq!(agg["minLatencyMs"], 50);
    assert_eq!(agg["maxLatencyMs"], 120);
}

#[tokio::test]
async fn single_ingest_accepted() {
    let state = make_state();
    let addr = spawn_analytics(state).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/v1/telemetry/ingest"))
        .json(&record_json("req-single", 200, 30))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
}

#[tokio::test]
async fn empty_batch_rejected() {
    let state = make_state();
    let addr = spawn_analytics(state).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/v1/telemetry/ingest/batch"))
        .json(&json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn fully_invalid_batch_rejected_partial_accepted() {
    let state = make_state();
    let addr = spawn_analytics(state).await;
    let client = reqwest::Client::new();

    // 전부 무효 (필수 필드 빈 값) → 400
    let invalid = json!([
        {"requestId": "", "path": "", "method": "", "statusCode": 200,
         "latencyMs": 1, "clientId": "x", "timestamp": Utc::now().to_rfc3339()},
    ]);
    let resp = client
        .post(format!("http://{addr}/api/v1/telemetry/ingest/batch"))
        .json(&invalid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // 일부 무효는 걸러내고 202
    let mixed = json!([
        {"requestId": "", "path": "", "method": "", "statusCode": 200,
         "latencyMs": 1, "clientId": "x", "timestamp": Utc::now().to_rfc3339()},
        record_json("req-ok", 200, 10),
    ]);
    let resp = client
        .post(format!("http://{addr}/api/v1/telemetry/ingest/batch"))
        .json(&mixed)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
}

#[tokio::test]
async fn endpoint_metrics_lookup_and_404() {
    let state = make_state();
    let addr = spawn_analytics(state).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/api/v1/telemetry/ingest/batch"))
        .json(&json!([record_json("req-1", 200, 40)]))
        .send()
        .await
        .unwrap();

    // 집계 준비 대기
    poll_aggregated(&client, addr, Duration::from_secs(1)).await;

    let resp = client
        .get(format!(
            "http://{addr}/api/v1/metrics/endpoint/api/users?method=GET"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let agg: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(agg["endpoint"], "/api/users");

    // 없는 엔드포인트는 404
    let resp = client
        .get(format!(
            "http://{addr}/api/v1/metrics/endpoint/api/none?method=GET"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn rps_and_top_endpoints_from_raw_store() {
    let state = make_state();
    let sink_handles = state.sink.start(2);
    let sink = state.sink.clone();
    let addr = spawn_analytics(state).await;
    let client = reqwest::Client::new();

    let batch: Vec<serde_json::Value> = (0..30)
        .map(|i| record_json(&format!("req-{i}"), 200, 20))
        .collect();
    client
        .post(format!("http://{addr}/api/v1/telemetry/ingest/batch"))
        .json(&batch)
        .send()
        .await
        .unwrap();

    // 싱크 플러시 대기 (기본 플러시 간격 500ms)
    tokio::time::sleep(Duration::from_millis(800)).await;

    let rps: serde_json::Value = client
        .get(format!("http://{addr}/api/v1/metrics/rps"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rps["window_seconds"], 60);
    assert!(rps["rps"].as_f64().unwrap() >= 30.0 / 60.0 - 1e-9);

    let top: Vec<serde_json::Value> = client
        .get(format!("http://{addr}/api/v1/metrics/top-endpoints?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["endpoint"], "/api/users");
    assert_eq!(top[0]["count"], 30);

    sink.shutdown(sink_handles).await;
}

#[tokio::test]
async fn large_burst_aggregates_consistent() {
    let state = make_state();
    let _sink_handles = state.sink.start(4);
    let addr = spawn_analytics(state).await;
    let client = reqwest::Client::new();

    // 두 키로 2,000건 버스트
    let batch: Vec<serde_json::Value> = (0..2_000)
        .map(|i| {
            let path = if i % 2 == 0 { "/api/users" } else { "/api/orders" };
            json!({
                "requestId": format!("burst-{i}"),
                "path": path,
                "method": "GET",
                "statusCode": 200,
                "latencyMs": 10 + (i % 50),
                "clientId": "abcdefgh",
                "timestamp": Utc::now().to_rfc3339(),
            })
        })
        .collect();

    let resp = client
        .post(format!("http://{addr}/api/v1/telemetry/ingest/batch"))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let aggregates = poll_aggregated(&client, addr, Duration::from_secs(2)).await;
    assert!(!aggregates.is_empty());

    // 키별 집계의 requestCount는 제출량을 넘을 수 없다
    for agg in &aggregates {
        let count = agg["requestCount"].as_u64().unwrap();
        assert!(count <= 1_000, "키당 1,000건 제출, 집계 {count}");
        let errors = agg["errorCount"].as_u64().unwrap();
        let successes = agg["successCount"].as_u64().unwrap();
        assert_eq!(errors + successes, count);
    }
}
