//! # flowgate-gateway
//!
//! API 게이트웨이.
//! 요청당 필터 체인(인증 → 레이트리밋 → 라우팅)과 최외곽 텔레메트리 캡처,
//! 업스트림 프록시, 분석 서비스로의 배치 텔레메트리 방출을 담당한다.
//!
//! ## 요청 흐름
//!
//! ```text
//! 클라이언트 → [텔레메트리 캡처] → [인증] → [레이트리밋] → [프록시] → 업스트림
//!                     │ (단일 완료 지점에서 레코드 방출)
//!                     └→ 이미터 큐 → 배치 워커 → 분석 서비스
//! ```

pub mod admin;
pub mod emitter;
pub mod filters;
pub mod proxy;
pub mod router;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use flowgate_core::config::GatewayConfig;
use flowgate_core::error::CoreError;
use flowgate_core::ports::kv::KvStore;

pub use emitter::TelemetryEmitter;
pub use router::RouteTable;

/// 게이트웨이 애플리케이션 상태
#[derive(Clone)]
pub struct GatewayState {
    /// 게이트웨이 설정
    pub config: Arc<GatewayConfig>,
    /// 라우트 테이블
    pub routes: Arc<RouteTable>,
    /// 레이트리밋 카운터 저장소
    pub kv: Arc<dyn KvStore>,
    /// 텔레메트리 이미터
    pub emitter: TelemetryEmitter,
    /// 업스트림 HTTP 클라이언트
    pub http: reqwest::Client,
}

impl GatewayState {
    /// 설정과 KV 포트로 상태 구성
    pub fn new(config: GatewayConfig, kv: Arc<dyn KvStore>) -> Result<Self, CoreError> {
        let emitter = TelemetryEmitter::new(&config.telemetry)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.upstream_timeout_ms))
            .build()
            .map_err(|e| CoreError::Network(format!("업스트림 클라이언트 빌드 실패: {e}")))?;

        Ok(Self {
            routes: Arc::new(RouteTable::from_config(&config.routes)),
            config: Arc::new(config),
            kv,
            emitter,
            http,
        })
    }
}

/// 게이트웨이 라우터 생성.
///
/// 레이어 순서(바깥 → 안): 텔레메트리 → 인증 → 레이트리밋 → 관리 API/프록시.
/// 텔레메트리가 최외곽이라 401/429/404도 빠짐없이 캡처된다.
pub fn gateway_routes(state: GatewayState) -> Router {
    Router::new()
        .route("/admin/routes", get(admin::get_routes))
        .route("/admin/info", get(admin::get_info))
        .route("/admin/telemetry", get(admin::get_telemetry))
        .fallback(proxy::proxy_handler)
        .layer(from_fn_with_state(
            state.clone(),
            filters::rate_limit::rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            filters::auth::auth_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            filters::telemetry::telemetry_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 게이트웨이 서버
pub struct GatewayServer {
    state: GatewayState,
}

impl GatewayServer {
    /// 새 서버 생성
    pub fn new(state: GatewayState) -> Self {
        Self { state }
    }

    /// 애플리케이션 상태 참조
    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// 서버 실행 — 종료 신호까지 블록.
    /// 이미터 워커는 호출측(앱)이 기동/종료한다.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.state.config.port).into();
        let listener = TcpListener::bind(addr).await?;
        info!("게이트웨이 시작: http://{}", listener.local_addr()?);

        let app = gateway_routes(self.state);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                if *shutdown_rx.borrow() {
                    info!("게이트웨이 종료 신호 수신");
                    break;
                }
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

        info!("게이트웨이 종료");
        Ok(())
    }
}
