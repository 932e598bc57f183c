//! # flowgate-analytics
//!
//! 실시간 분석 서비스.
//! 텔레메트리 인제스트(배치/단건) → 원시 싱크(SQLite) + 메트릭 엔진(인메모리)
//! 팬아웃, 슬라이딩 윈도우 집계 계산, 대시보드 조회 API.
//!
//! ## 구성 요소
//! - `sink`: 유계 큐 + 워커 풀, 원시 이벤트 배치 영속화
//! - `engine`: 키별 이벤트 버퍼, 디바운스 재계산, 주기 스윕
//! - `digest`: 키별 t-digest 분위수 레지스트리
//! - `cache_repo`: 집계 캐시 (KV, TTL 5분)

pub mod cache_repo;
pub mod digest;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metrics_api;
pub mod sink;

use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use flowgate_core::config::AnalyticsConfig;
use flowgate_core::ports::event_store::EventStore;
use flowgate_core::ports::kv::KvStore;

pub use cache_repo::MetricCacheRepository;
pub use engine::MetricEngine;
pub use sink::RawEventSink;

/// 분석 서비스 애플리케이션 상태
#[derive(Clone)]
pub struct AppState {
    /// 메트릭 엔진
    pub engine: MetricEngine,
    /// 원시 이벤트 싱크
    pub sink: RawEventSink,
    /// 집계 캐시
    pub cache: MetricCacheRepository,
    /// 원시 이벤트 저장소
    pub store: Arc<dyn EventStore>,
}

impl AppState {
    /// 포트 어댑터로부터 상태 구성
    pub fn new(config: &AnalyticsConfig, kv: Arc<dyn KvStore>, store: Arc<dyn EventStore>) -> Self {
        let cache = MetricCacheRepository::new(kv);
        let engine = MetricEngine::new(&config.metrics, cache.clone());
        let sink = RawEventSink::new(store.clone(), config);
        Self {
            engine,
            sink,
            cache,
            store,
        }
    }
}

/// API 라우터 생성
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        // 텔레메트리 인제스트
        .route("/api/v1/telemetry/ingest", post(ingest::ingest))
        .route("/api/v1/telemetry/ingest/batch", post(ingest::ingest_batch))
        // 메트릭 조회
        .route("/api/v1/metrics/aggregated", get(metrics_api::get_aggregated))
        .route(
            "/api/v1/metrics/endpoint/*path",
            get(metrics_api::get_endpoint_metrics),
        )
        .route("/api/v1/metrics/rps", get(metrics_api::get_rps))
        .route(
            "/api/v1/metrics/top-endpoints",
            get(metrics_api::get_top_endpoints),
        )
        .route(
            "/api/v1/metrics/events/recent",
            get(metrics_api::get_recent_events),
        )
        .route("/api/v1/metrics/debug", get(metrics_api::get_debug))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 분석 서비스 서버
pub struct AnalyticsServer {
    config: AnalyticsConfig,
    state: AppState,
}

impl AnalyticsServer {
    /// 새 서버 생성
    pub fn new(config: AnalyticsConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// 애플리케이션 상태 참조
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// 서버 실행 — 종료 신호까지 블록.
    ///
    /// 싱크 워커와 스위퍼는 호출측(앱)이 기동한다. 이 함수는 HTTP 서빙만 맡는다.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;
        info!("분석 서비스 시작: http://{}", listener.local_addr()?);

        let app = api_routes(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        info!("분석 서비스 종료 신호 수신");
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await?;

        info!("분석 서비스 종료");
        Ok(())
    }
}
