//! 게이트웨이 관리 API.
//!
//! 라우트 테이블 점검, 서비스 정보, 이미터 카운터 노출.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::emitter::EmitterStats;
use crate::GatewayState;

/// 라우트 요약
#[derive(Debug, Serialize)]
pub struct RouteSummary {
    /// 라우트 ID
    pub id: String,
    /// 경로 프리픽스
    pub path_prefix: String,
    /// 제거 세그먼트 수
    pub strip_prefix: usize,
    /// 업스트림 URI
    pub upstream: String,
}

/// 서비스 정보
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    /// 서비스 이름
    pub service: &'static str,
    /// 버전
    pub version: &'static str,
    /// 기능 목록
    pub features: Vec<&'static str>,
}

/// 설정된 라우트 목록
///
/// GET /admin/routes
pub async fn get_routes(State(state): State<GatewayState>) -> Json<Vec<RouteSummary>> {
    let routes = state
        .routes
        .rules()
        .iter()
        .map(|r| RouteSummary {
            id: r.id.clone(),
            path_prefix: r.path_prefix.clone(),
            strip_prefix: r.strip_prefix,
            upstream: r.upstream.clone(),
        })
        .collect();
    Json(routes)
}

/// 서비스 정보
///
/// GET /admin/info
pub async fn get_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "flowgate-gateway",
        version: env!("CARGO_PKG_VERSION"),
        features: vec!["authentication", "rate-limiting", "telemetry", "routing"],
    })
}

/// 텔레메트리 이미터 카운터
///
/// GET /admin/telemetry
pub async fn get_telemetry(State(state): State<GatewayState>) -> Json<EmitterStats> {
    Json(state.emitter.stats())
}
