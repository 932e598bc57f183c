//! 텔레메트리 인제스트 핸들러.
//!
//! 게이트웨이가 보내는 단건/배치 제출을 받아 원시 싱크와 메트릭 엔진으로
//! 팬아웃한다. 응답은 내구성을 기다리지 않는다 — 항상 202.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::collections::HashSet;
use tracing::{debug, warn};

use flowgate_core::models::telemetry::TelemetryRecord;

use crate::AppState;

/// 단건 인제스트
///
/// POST /api/v1/telemetry/ingest
pub async fn ingest(
    State(state): State<AppState>,
    Json(record): Json<TelemetryRecord>,
) -> StatusCode {
    if !record.is_valid() {
        warn!("유효하지 않은 단건 레코드 거부");
        return StatusCode::BAD_REQUEST;
    }

    fan_out(&state, &record);
    state.engine.trigger_immediate(&record.aggregation_key());
    StatusCode::ACCEPTED
}

/// 배치 인제스트
///
/// POST /api/v1/telemetry/ingest/batch
///
/// 전체가 비었거나 전부 무효일 때만 400. 일부 무효는 걸러내고 진행한다.
/// 팬아웃 후 배치에 등장한 키마다 즉시 재계산을 트리거해 새 트래픽이
/// 2초 안에 대시보드에 드러나게 한다.
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(records): Json<Vec<TelemetryRecord>>,
) -> StatusCode {
    if records.is_empty() {
        warn!("빈 배치 수신");
        return StatusCode::BAD_REQUEST;
    }

    let total = records.len();
    let valid: Vec<TelemetryRecord> = records.into_iter().filter(|r| r.is_valid()).collect();

    if valid.is_empty() {
        warn!("배치 전체({total}건)가 무효");
        return StatusCode::BAD_REQUEST;
    }
    if valid.len() < total {
        debug!("배치 {total}건 중 무효 {}건 필터링", total - valid.len());
    }

    let mut keys = HashSet::new();
    for record in &valid {
        fan_out(&state, record);
        keys.insert(record.aggregation_key());
    }

    // 배치에 등장한 키마다 즉시 재계산
    for key in &keys {
        state.engine.trigger_immediate(key);
    }

    debug!("배치 인제스트: {}건 수용, 키 {}개", valid.len(), keys.len());
    StatusCode::ACCEPTED
}

/// 레코드 1건 팬아웃: 원시 싱크 인큐 + 메트릭 엔진 반영.
/// 싱크 드랍은 싱크가 카운트한다 — 인제스트 응답에는 영향 없음.
fn fan_out(state: &AppState, record: &TelemetryRecord) {
    state.sink.enqueue(record.clone());
    state.engine.record(record);
}
