//! 원시 이벤트 저장소 포트.
//!
//! 구현: `flowgate-storage` crate (rusqlite)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::models::telemetry::TelemetryRecord;

/// 엔드포인트별 요청 수 (top-endpoints 조회 결과)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EndpointCount {
    /// 엔드포인트 경로
    pub endpoint: String,
    /// 요청 수
    pub count: u64,
}

/// 관계형 원시 이벤트 저장소.
///
/// `request_id`에 uniqueness 제약이 있다. 배치 삽입이 제약 위반으로 전체
/// 실패하면 호출측이 개별 삽입으로 폴백한다.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// 배치 삽입 — 전체가 하나의 트랜잭션. 제약 위반 시 `Duplicate` 에러.
    async fn save_batch(&self, records: &[TelemetryRecord]) -> Result<usize, CoreError>;

    /// 단건 삽입 — 중복 키는 조용히 건너뛰고 false 반환.
    async fn save_one(&self, record: &TelemetryRecord) -> Result<bool, CoreError>;

    /// 시각 이후 이벤트 수
    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, CoreError>;

    /// 시각 이후 요청 수 상위 엔드포인트
    async fn top_endpoints(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EndpointCount>, CoreError>;

    /// 최근 이벤트 (최신순)
    async fn recent_events(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TelemetryRecord>, CoreError>;
}
