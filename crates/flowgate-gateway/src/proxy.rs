//! 업스트림 프록시.
//!
//! 라우트 테이블에서 최장 프리픽스 매칭 → 세그먼트 스트립 → reqwest 포워딩.
//! 매칭 실패 404, 연결 실패 502, 타임아웃 504. 매칭 결과와 에러 태그는
//! 응답 확장으로 텔레메트리 캡처에 전달된다.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::filters::{ErrorTag, RouteInfo};
use crate::GatewayState;

/// 요청 본문 최대 크기 (10MB)
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// hop-by-hop 헤더 — 프록시를 건너가면 안 된다
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// 에러 태그가 붙은 상태 코드 응답 생성
fn tagged_response(status: StatusCode, tag: &str) -> Response {
    let mut response = status.into_response();
    response.extensions_mut().insert(ErrorTag(tag.to_string()));
    response
}

/// 프록시 핸들러 — 라우터 폴백으로 모든 비관리 경로를 받는다
pub async fn proxy_handler(State(state): State<GatewayState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let Some(route) = state.routes.find(&path) else {
        debug!("매칭 라우트 없음: {path}");
        return tagged_response(StatusCode::NOT_FOUND, "RouteNotFound");
    };
    let route_info = RouteInfo {
        route_id: route.id.clone(),
        upstream_service: route.id.clone(),
    };

    // 업스트림 URI 구성
    let mut target = format!("{}{}", route.upstream, route.target_path(&path));
    if let Some(q) = query {
        target.push('?');
        target.push_str(&q);
    }

    // 메서드/헤더/본문 이관
    let method = match reqwest::Method::from_bytes(request.method().as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            let mut response = tagged_response(StatusCode::BAD_REQUEST, "InvalidMethod");
            response.extensions_mut().insert(route_info);
            return response;
        }
    };

    let mut headers = HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("요청 본문 읽기 실패: {e}");
            let mut response =
                tagged_response(StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge");
            response.extensions_mut().insert(route_info);
            return response;
        }
    };

    debug!("프록시: {path} → {target}");
    let upstream_result = state
        .http
        .request(method, &target)
        .headers(headers)
        .body(body_bytes)
        .send()
        .await;

    let mut response = match upstream_result {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder_headers = HeaderMap::new();
            for (name, value) in upstream.headers() {
                let name = HeaderName::from_bytes(name.as_str().as_bytes());
                if let (Ok(name), Ok(value)) = (
                    name,
                    axum::http::HeaderValue::from_bytes(value.as_bytes()),
                ) {
                    if !is_hop_by_hop(&name) {
                        builder_headers.insert(name, value);
                    }
                }
            }

            match upstream.bytes().await {
                Ok(bytes) => {
                    let mut response = Response::new(Body::from(bytes));
                    *response.status_mut() = status;
                    *response.headers_mut() = builder_headers;
                    if status.is_server_error() {
                        response
                            .extensions_mut()
                            .insert(ErrorTag("UpstreamError".to_string()));
                    }
                    response
                }
                Err(e) => {
                    warn!("업스트림 본문 수신 실패 ({target}): {e}");
                    tagged_response(StatusCode::BAD_GATEWAY, "UpstreamBody")
                }
            }
        }
        Err(e) if e.is_timeout() => {
            warn!("업스트림 타임아웃 ({target})");
            tagged_response(StatusCode::GATEWAY_TIMEOUT, "UpstreamTimeout")
        }
        Err(e) if e.is_connect() => {
            warn!("업스트림 연결 실패 ({target}): {e}");
            tagged_response(StatusCode::BAD_GATEWAY, "UpstreamConnect")
        }
        Err(e) => {
            warn!("업스트림 요청 실패 ({target}): {e}");
            tagged_response(StatusCode::BAD_GATEWAY, "UpstreamError")
        }
    };

    response.extensions_mut().insert(route_info);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_filtering() {
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(is_hop_by_hop(&HeaderName::from_static("host")));
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("x-api-key")));
    }

    #[test]
    fn tagged_response_carries_error_type() {
        let response = tagged_response(StatusCode::NOT_FOUND, "RouteNotFound");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let tag = response.extensions().get::<ErrorTag>().unwrap();
        assert_eq!(tag.0, "RouteNotFound");
    }
}
