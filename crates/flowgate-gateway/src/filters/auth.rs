//! 인증 필터.
//!
//! `X-API-Key` 헤더의 불투명 키를 검사한다. 키 인식 이상의 권한 부여는
//! 하지 않는다. 수용 시 클라이언트 컨텍스트를 요청에 붙이고, 응답에도
//! 복사해 최외곽 텔레메트리 캡처가 읽을 수 있게 한다.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::filters::{is_skip_path, ClientContext};
use crate::GatewayState;

/// API 키 헤더 이름
pub const API_KEY_HEADER: &str = "X-API-Key";

/// API 키 검증 — 최소 길이 이상의 비어 있지 않은 키만 수용
fn is_valid_api_key(api_key: &str, min_length: usize) -> bool {
    !api_key.is_empty() && api_key.len() >= min_length
}

/// API 키에서 클라이언트 ID 파생 (앞 8자)
fn extract_client_id(api_key: &str) -> String {
    api_key.chars().take(8).collect()
}

/// 인증 미들웨어
pub async fn auth_middleware(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth = &state.config.auth;
    if !auth.enabled {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    if is_skip_path(&state.config.skip_paths, &path) {
        return next.run(request).await;
    }

    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !is_valid_api_key(&api_key, auth.min_key_length) {
        warn!("요청 거부: API 키 누락/불량, 경로 {path}");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let ctx = ClientContext {
        client_id: extract_client_id(&api_key),
        api_key,
    };
    request.extensions_mut().insert(ctx.clone());

    // 텔레메트리 캡처(최외곽)가 읽도록 응답에도 복사
    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}
