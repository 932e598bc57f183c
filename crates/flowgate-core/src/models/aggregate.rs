//! 슬라이딩 윈도우 집계 모델.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// (endpoint, method) 키 하나에 대한 윈도우 집계.
///
/// 메트릭 엔진이 생성/덮어쓰기하고 대시보드 조회 API가 읽는다.
/// 캐시 TTL(5분)로 만료된다.
///
/// 불변식: `error_count + success_count == request_count`,
/// `0 ≤ error_rate ≤ 100`, `rps ≥ 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowAggregate {
    /// 정규화된 엔드포인트 경로
    pub endpoint: String,
    /// HTTP 메서드
    pub method: String,
    /// 윈도우 시작
    pub window_start: DateTime<Utc>,
    /// 윈도우 종료
    pub window_end: DateTime<Utc>,
    /// 윈도우 내 요청 수
    pub request_count: u64,
    /// 초당 요청 수 (§4.5 규칙으로 계산)
    pub rps: f64,
    /// p50 지연 (밀리초)
    pub p50_latency_ms: u64,
    /// p90 지연 (밀리초)
    pub p90_latency_ms: u64,
    /// p99 지연 (밀리초)
    pub p99_latency_ms: u64,
    /// 최소 지연 (밀리초)
    pub min_latency_ms: u64,
    /// 최대 지연 (밀리초)
    pub max_latency_ms: u64,
    /// 에러 비율 (%)
    pub error_rate: f64,
    /// 에러 수 (상태 코드 ≥ 400)
    pub error_count: u64,
    /// 성공 수
    pub success_count: u64,
    /// 업스트림 서비스 이름
    #[serde(default)]
    pub upstream_service: String,
}

impl WindowAggregate {
    /// 집계 불변식 검사 (테스트/디버그용)
    pub fn invariants_hold(&self) -> bool {
        self.error_count + self.success_count == self.request_count
            && (0.0..=100.0).contains(&self.error_rate)
            && self.rps >= 0.0
            && self.window_start <= self.window_end
            && self.min_latency_ms <= self.max_latency_ms
    }
}
