//! FLOWGATE 공통 에러 타입.
//!
//! 모든 어댑터 crate는 자체 에러를 `CoreError`로 래핑해 전파한다.

use thiserror::Error;

/// 코어 레이어 에러.
/// 게이트웨이/분석 양쪽에서 공유하는 도메인 공통 에러를 정의한다.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류 (기동 시 치명적)
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패 — {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 인증 실패 (API 키 누락/불량)
    #[error("인증 에러: {0}")]
    Auth(String),

    /// 요청 한도 초과 (429)
    #[error("요청 한도 초과, {retry_after_secs}초 후 재시도")]
    RateLimit {
        /// 재시도 대기 시간 (초)
        retry_after_secs: u64,
    },

    /// 리소스를 찾을 수 없음
    #[error("{resource_type} 미발견: {id}")]
    NotFound {
        /// 리소스 종류 (예: "Route", "Aggregate")
        resource_type: String,
        /// 리소스 식별자
        id: String,
    },

    /// 네트워크 에러 (연결 실패, 타임아웃)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 업스트림/외부 서비스 일시 불가 (5xx)
    #[error("서비스 일시 불가: {0}")]
    ServiceUnavailable(String),

    /// 관계형 저장소 에러
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// 키 중복 (uniqueness 제약 위반)
    #[error("중복 키: {0}")]
    Duplicate(String),

    /// KV 캐시 에러
    #[error("캐시 에러: {0}")]
    Cache(String),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// 일시적 에러 여부 — 재시도 가능한 에러만 true
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Network(_) | CoreError::ServiceUnavailable(_) | CoreError::RateLimit { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CoreError::Network("연결 거부".to_string()).is_transient());
        assert!(CoreError::ServiceUnavailable("점검 중".to_string()).is_transient());
        assert!(CoreError::RateLimit {
            retry_after_secs: 60
        }
        .is_transient());
        assert!(!CoreError::Auth("키 누락".to_string()).is_transient());
        assert!(!CoreError::Duplicate("req-1".to_string()).is_transient());
        assert!(!CoreError::Storage("디스크".to_string()).is_transient());
    }

    #[test]
    fn error_display() {
        let err = CoreError::NotFound {
            resource_type: "Aggregate".to_string(),
            id: "/api/users:GET".to_string(),
        };
        assert!(err.to_string().contains("Aggregate"));
        assert!(err.to_string().contains("/api/users:GET"));
    }
}
