//! 레이트리밋 필터.
//!
//! 클라이언트당 슬라이딩 분 카운터를 KV에 유지한다. 키는
//! `rate_limit:{clientId}`, 윈도우 첫 증가 때 60초 TTL을 건다.
//! KV 장애 시 fail open — 요청을 거부하는 것보다 통과시키는 쪽을 택한다.
//! 한도 초과 429도 최외곽 텔레메트리 캡처가 그대로 관측한다.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

use flowgate_core::key::RATE_LIMIT_KEY_PREFIX;

use crate::filters::{is_skip_path, ClientContext};
use crate::GatewayState;

/// 레이트리밋 한도 응답 헤더
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";

/// 잔여 요청 수 응답 헤더
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// 레이트리밋 검사 결과
#[derive(Debug, PartialEq, Eq)]
enum RateDecision {
    /// 한도 내 — 통과
    Allowed,
    /// 한도 초과 — 429
    Exceeded,
}

/// 카운터 증가 + 윈도우 첫 증가 시 TTL 설정.
/// KV 에러는 fail open으로 흡수한다.
async fn check_rate_limit(
    state: &GatewayState,
    client_key: &str,
    limit: u64,
    window: Duration,
) -> RateDecision {
    let kv_key = format!("{RATE_LIMIT_KEY_PREFIX}{client_key}");

    let count = match state.kv.increment(&kv_key).await {
        Ok(count) => count,
        Err(e) => {
            warn!("레이트리밋 카운터 증가 실패, fail open: {e}");
            return RateDecision::Allowed;
        }
    };

    if count == 1 {
        if let Err(e) = state.kv.expire(&kv_key, window).await {
            warn!("레이트리밋 TTL 설정 실패: {e}");
        }
    }

    if count as u64 > limit {
        RateDecision::Exceeded
    } else {
        RateDecision::Allowed
    }
}

/// 레이트리밋 미들웨어
pub async fn rate_limit_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let rate = &state.config.rate_limit;
    if !rate.enabled {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    if is_skip_path(&state.config.skip_paths, &path) {
        return next.run(request).await;
    }

    // 키 파생: 클라이언트 ID → 원격 주소 → "unknown"
    let client_key = request
        .extensions()
        .get::<ClientContext>()
        .map(|ctx| ctx.client_id.clone())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let limit = rate.default_requests_per_minute;
    let window = Duration::from_secs(rate.window_secs);

    match check_rate_limit(&state, &client_key, limit, window).await {
        RateDecision::Allowed => next.run(request).await,
        RateDecision::Exceeded => {
            debug!("레이트리밋 초과: 클라이언트 {client_key}, 경로 {path}");
            // 429로 단락하되 텔레메트리 레이어가 바깥에서 관측한다
            let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
                headers.insert(LIMIT_HEADER, value);
            }
            headers.insert(REMAINING_HEADER, HeaderValue::from_static("0"));
            response
        }
    }
}
