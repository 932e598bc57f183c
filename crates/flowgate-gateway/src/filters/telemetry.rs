//! 텔레메트리 캡처 필터.
//!
//! 최외곽 미들웨어. 진입 시 요청 ID와 시작 시각을 잡고, 내부 스택이 응답을
//! 완성하면 레코드 하나를 만들어 이미터에 넘긴다. 완료 지점이 하나뿐이지만
//! `EmitOnce` CAS 가드로 요청당 최대 1회 방출을 구조적으로 보장한다.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use uuid::Uuid;

use flowgate_core::models::telemetry::TelemetryRecord;

use crate::emitter::TelemetryEmitter;
use crate::filters::{ClientContext, ErrorTag, RouteInfo};
use crate::GatewayState;

/// 요청당 1회 방출 가드.
///
/// 플래그를 이미터 호출 **전에** CAS로 선점해 완료 신호가 여러 번 겹쳐도
/// 레코드는 정확히 하나만 나간다.
#[derive(Debug, Default)]
pub struct EmitOnce {
    emitted: AtomicBool,
}

impl EmitOnce {
    /// 새 가드 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 방출 시도. 첫 호출만 이미터에 전달되고 true를 반환한다.
    pub fn emit(&self, emitter: &TelemetryEmitter, record: TelemetryRecord) -> bool {
        if self
            .emitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            emitter.emit(record);
            true
        } else {
            false
        }
    }

    /// 이미 방출됐는지 여부
    pub fn already_emitted(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }
}

/// 라우트 정보가 없을 때 경로에서 업스트림 이름 유추.
/// "/api/{svc}/..." 형태면 {svc}, 아니면 "unknown".
fn derive_upstream_from_path(path: &str) -> String {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("api"), Some(service)) => service.to_string(),
        _ => "unknown".to_string(),
    }
}

/// 텔레메트리 캡처 미들웨어
pub async fn telemetry_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.telemetry.enabled {
        return next.run(request).await;
    }

    // 진입 시점 캡처
    let request_id = Uuid::new_v4().to_string();
    let start = Instant::now();
    let path = request.uri().path().to_string();
    let method = request.method().as_str().to_string();
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ip_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let guard = EmitOnce::new();
    let response = next.run(request).await;

    // 단일 완료 지점: 응답 확장에서 내부 스택이 남긴 정보를 수거
    let client_ctx = response.extensions().get::<ClientContext>().cloned();
    let route_info = response.extensions().get::<RouteInfo>().cloned();
    let error_tag = response.extensions().get::<ErrorTag>().cloned();

    let (route_id, upstream_service) = match route_info {
        Some(info) => (info.route_id, info.upstream_service),
        None => (String::new(), derive_upstream_from_path(&path)),
    };

    let record = TelemetryRecord {
        request_id,
        path,
        method,
        status_code: response.status().as_u16(),
        latency_ms: start.elapsed().as_millis() as u64,
        client_id: client_ctx
            .as_ref()
            .map(|c| c.client_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        api_key: client_ctx.map(|c| c.api_key).unwrap_or_default(),
        upstream_service,
        route_id,
        timestamp: Utc::now(),
        error_type: error_tag.map(|tag| tag.0),
        user_agent,
        ip_address,
    };

    guard.emit(&state.emitter, record);
    response
}
