//! 게이트웨이 필터 체인.
//!
//! 미들웨어 스택 (바깥 → 안): 텔레메트리 캡처 → 인증 → 레이트리밋 → 프록시.
//! 텔레메트리가 최외곽이므로 인증 401, 레이트리밋 429, 라우팅 404를 포함한
//! 모든 응답이 단일 완료 지점에서 관측된다.

pub mod auth;
pub mod rate_limit;
pub mod telemetry;

/// 인증 필터가 요청 컨텍스트에 붙이는 클라이언트 정보.
/// 다운스트림 필터와 텔레메트리 캡처가 읽는다.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// 자격증명 앞 8자로 파생한 클라이언트 ID
    pub client_id: String,
    /// 원시 API 키
    pub api_key: String,
}

/// 프록시가 응답 확장에 붙이는 라우트 정보
#[derive(Debug, Clone)]
pub struct RouteInfo {
    /// 매칭된 라우트 ID
    pub route_id: String,
    /// 논리적 백엔드 이름
    pub upstream_service: String,
}

/// 응답 확장에 붙는 에러 태그 — 텔레메트리 `error_type`으로 실린다
#[derive(Debug, Clone)]
pub struct ErrorTag(pub String);

/// 경로가 스킵 목록(프리픽스)에 해당하는지 검사.
/// 인증과 레이트리밋이 동일한 목록을 공유한다.
pub fn is_skip_path(skip_paths: &[String], path: &str) -> bool {
    skip_paths.iter().any(|p| path.starts_with(p.as_str()))
}
