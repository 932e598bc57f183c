//! 집계 키 — 경로 정규화 + 메서드.
//!
//! 생산자(게이트웨이)와 소비자(분석 서비스)가 동일한 규칙으로 키를 만들어야
//! 이벤트 버퍼, 다이제스트, 메트릭 캐시가 같은 엔트리를 가리킨다.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 메트릭 캐시 키 프리픽스
pub const METRIC_KEY_PREFIX: &str = "metrics:";

/// 레이트리밋 카운터 키 프리픽스
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

/// 경로 정규화.
///
/// 규칙: 앞뒤 공백 제거, 선행 `/` 보장, 연속 `/` 축약,
/// 루트를 제외한 후행 `/` 제거. 빈 문자열은 `/`.
/// 멱등: `normalize_path(normalize_path(p)) == normalize_path(p)`
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push('/');

    for c in trimmed.chars() {
        if c == '/' {
            // 연속 슬래시 축약
            if !out.ends_with('/') {
                out.push('/');
            }
        } else {
            out.push(c);
        }
    }

    // 루트 제외 후행 슬래시 제거
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }

    out
}

/// 메서드 정규화 — 대문자, 빈 값은 GET
pub fn normalize_method(method: &str) -> String {
    let m = method.trim();
    if m.is_empty() {
        "GET".to_string()
    } else {
        m.to_ascii_uppercase()
    }
}

/// 집계 키 — (정규화 경로, 대문자 메서드) 쌍
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    /// 정규화된 URI 경로
    pub path: String,
    /// 대문자 HTTP 메서드
    pub method: String,
}

impl AggregationKey {
    /// 원시 경로/메서드에서 키 생성 (정규화 적용)
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            path: normalize_path(path),
            method: normalize_method(method),
        }
    }

    /// 메트릭 캐시 키 반환: `metrics:{path}:{METHOD}`
    pub fn cache_key(&self) -> String {
        format!("{METRIC_KEY_PREFIX}{self}")
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_variants() {
        assert_eq!(normalize_path("/a//b/"), "/a/b");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("/a/b"), "/a/b");
        assert_eq!(normalize_path("///a///b///"), "/a/b");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("   "), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("//"), "/");
    }

    #[test]
    fn normalize_idempotent() {
        for p in ["/a//b/", "a/b", "/a/b", "", "//", "/api/users/", "api//v1//users"] {
            let once = normalize_path(p);
            assert_eq!(normalize_path(&once), once, "입력: {p:?}");
        }
    }

    #[test]
    fn method_normalization() {
        assert_eq!(normalize_method("get"), "GET");
        assert_eq!(normalize_method("Post"), "POST");
        assert_eq!(normalize_method(""), "GET");
        assert_eq!(normalize_method(" delete "), "DELETE");
    }

    #[test]
    fn key_display_and_cache_key() {
        let key = AggregationKey::new("/api/users/", "get");
        assert_eq!(key.to_string(), "/api/users:GET");
        assert_eq!(key.cache_key(), "metrics:/api/users:GET");
    }

    #[test]
    fn same_key_both_sides() {
        // 생산자/소비자가 서로 다른 표기로 만들어도 같은 키
        let producer = AggregationKey::new("/api/users", "GET");
        let consumer = AggregationKey::new("api//users/", "get");
        assert_eq!(producer, consumer);
    }
}
