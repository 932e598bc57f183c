//! 메트릭 조회 API 핸들러 (대시보드 폴러용).
//!
//! 집계는 캐시에서, RPS/상위 엔드포인트/최근 이벤트는 원시 저장소에서 읽는다.
//! 캐시/저장소 장애는 빈 결과로 강등한다 — 대시보드는 계속 동작해야 한다.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use flowgate_core::key::AggregationKey;
use flowgate_core::models::aggregate::WindowAggregate;
use flowgate_core::models::telemetry::TelemetryRecord;
use flowgate_core::ports::event_store::EndpointCount;

use crate::error::ApiError;
use crate::AppState;

/// RPS 조회 윈도우 (초)
const RPS_WINDOW_SECS: i64 = 60;

/// 최근 이벤트 조회 윈도우 (분)
const RECENT_WINDOW_MINS: i64 = 5;

/// 메서드 쿼리 파라미터
#[derive(Debug, Deserialize)]
pub struct MethodQuery {
    /// HTTP 메서드 (기본: GET)
    pub method: Option<String>,
}

/// limit 쿼리 파라미터
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    /// 반환 개수 한도
    pub limit: Option<usize>,
}

/// RPS 응답
#[derive(Debug, Serialize)]
pub struct RpsResponse {
    /// 초당 요청 수
    pub rps: f64,
    /// 조회 윈도우 (초)
    pub window_seconds: u64,
}

/// 디버그 응답 — 데이터 흐름 점검용
#[derive(Debug, Serialize)]
pub struct DebugResponse {
    /// 최근 60초 원시 이벤트 수
    pub events_in_last_60s: u64,
    /// 캐시된 집계 수
    pub cached_metrics_count: usize,
    /// 엔진 통계
    pub engine: crate::engine::EngineStats,
    /// 싱크 통계
    pub sink: crate::sink::SinkStats,
    /// 조회 시각
    pub timestamp: chrono::DateTime<Utc>,
}

/// 전체 집계 조회
///
/// GET /api/v1/metrics/aggregated
///
/// 트래픽이 없거나 캐시 장애면 빈 배열 — 대시보드가 빈 상태를 렌더링한다.
pub async fn get_aggregated(State(state): State<AppState>) -> Json<Vec<WindowAggregate>> {
    Json(state.cache.get_all().await)
}

/// 단일 엔드포인트 집계 조회
///
/// GET /api/v1/metrics/endpoint/{path}?method=GET
pub async fn get_endpoint_metrics(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<MethodQuery>,
) -> Result<Json<WindowAggregate>, ApiError> {
    let method = params.method.unwrap_or_else(|| "GET".to_string());
    let key = AggregationKey::new(&format!("/{path}"), &method);

    match state.cache.get(&key).await {
        Ok(Some(aggregate)) => Ok(Json(aggregate)),
        Ok(None) => Err(ApiError::NotFound(format!("집계 없음: {key}"))),
        Err(e) => {
            warn!("집계 조회 실패 ({key}): {e}");
            Err(ApiError::NotFound(format!("집계 없음: {key}")))
        }
    }
}

/// 최근 60초 전역 RPS
///
/// GET /api/v1/metrics/rps
///
/// 원시 저장소 기반 — 저장소 장애 중에는 0을 반환할 수 있다.
pub async fn get_rps(State(state): State<AppState>) -> Json<RpsResponse> {
    let since = Utc::now() - Duration::seconds(RPS_WINDOW_SECS);
    let count = match state.store.count_since(since).await {
        Ok(count) => count,
        Err(e) => {
            warn!("RPS 카운트 조회 실패: {e}");
            0
        }
    };

    Json(RpsResponse {
        rps: count as f64 / RPS_WINDOW_SECS as f64,
        window_seconds: RPS_WINDOW_SECS as u64,
    })
}

/// 최근 60초 상위 엔드포인트
///
/// GET /api/v1/metrics/top-endpoints?limit=N
pub async fn get_top_endpoints(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> Json<Vec<EndpointCount>> {
    let limit = params.limit.unwrap_or(10);
    let since = Utc::now() - Duration::seconds(RPS_WINDOW_SECS);

    match state.store.top_endpoints(since, limit).await {
        Ok(endpoints) => Json(endpoints),
        Err(e) => {
            warn!("상위 엔드포인트 조회 실패: {e}");
            Json(Vec::new())
        }
    }
}

/// 최근 이벤트 조회 (최신순, 5분 윈도우)
///
/// GET /api/v1/metrics/events/recent?limit=N
pub async fn get_recent_events(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> Json<Vec<TelemetryRecord>> {
    let limit = params.limit.unwrap_or(100);
    let since = Utc::now() - Duration::minutes(RECENT_WINDOW_MINS);

    match state.store.recent_events(since, limit).await {
        Ok(events) => Json(events),
        Err(e) => {
            warn!("최근 이벤트 조회 실패: {e}");
            Json(Vec::new())
        }
    }
}

/// 데이터 흐름 디버그 정보
///
/// GET /api/v1/metrics/debug
pub async fn get_debug(State(state): State<AppState>) -> Json<DebugResponse> {
    let since = Utc::now() - Duration::seconds(RPS_WINDOW_SECS);
    let events_in_last_60s = state.store.count_since(since).await.unwrap_or(0);
    let cached = state.cache.get_all().await;

    Json(DebugResponse {
        events_in_last_60s,
        cached_metrics_count: cached.len(),
        engine: state.engine.stats(),
        sink: state.sink.stats(),
        timestamp: Utc::now(),
    })
}
