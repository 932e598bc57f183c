//! 라우트 테이블 — 최장 프리픽스 매칭 + 세그먼트 스트립.

use flowgate_core::config::RouteConfig;
use flowgate_core::key::normalize_path;

/// 컴파일된 라우트 규칙
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// 라우트 식별자 (논리적 백엔드 이름)
    pub id: String,
    /// 정규화된 경로 프리픽스
    pub path_prefix: String,
    /// 포워딩 전 제거할 선행 세그먼트 수
    pub strip_prefix: usize,
    /// 업스트림 베이스 URI (후행 슬래시 제거됨)
    pub upstream: String,
}

impl RouteRule {
    /// 세그먼트 경계를 존중하는 프리픽스 매칭.
    /// `/api/users`는 `/api/users`와 `/api/users/42`에 매칭되고
    /// `/api/users123`에는 매칭되지 않는다.
    fn matches(&self, path: &str) -> bool {
        if self.path_prefix == "/" {
            return true;
        }
        path == self.path_prefix
            || path
                .strip_prefix(self.path_prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// 선행 세그먼트를 제거한 업스트림 경로 반환
    pub fn target_path(&self, path: &str) -> String {
        let normalized = normalize_path(path);
        let stripped: Vec<&str> = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.strip_prefix)
            .collect();
        if stripped.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", stripped.join("/"))
        }
    }
}

/// 라우트 테이블
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// 설정에서 테이블 구성
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        Self {
            rules: routes
                .iter()
                .map(|r| RouteRule {
                    id: r.id.clone(),
                    path_prefix: normalize_path(&r.path_prefix),
                    strip_prefix: r.strip_prefix,
                    upstream: r.upstream.trim_end_matches('/').to_string(),
                })
                .collect(),
        }
    }

    /// 최장 프리픽스 매칭. 매칭 없으면 None.
    pub fn find(&self, path: &str) -> Option<&RouteRule> {
        let normalized = normalize_path(path);
        self.rules
            .iter()
            .filter(|r| r.matches(&normalized))
            .max_by_key(|r| r.path_prefix.len())
    }

    /// 규칙 목록
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// 규칙 수
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 테이블이 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
