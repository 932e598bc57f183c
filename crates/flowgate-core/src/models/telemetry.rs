//! 텔레메트리 레코드 — 게이트웨이/분석 경계를 넘는 유일한 엔티티.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::AggregationKey;

/// 요청 1건당 게이트웨이가 방출하는 텔레메트리 레코드.
///
/// `request_id`는 요청마다 새로 발급되며 원시 저장소에서 유일해야 한다.
/// `error_type`/`user_agent`/`ip_address`는 수집 가능할 때만 채워진다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// 요청 식별자 (UUID v4)
    pub request_id: String,
    /// 요청 경로 (수신측에서 정규화)
    pub path: String,
    /// HTTP 메서드
    pub method: String,
    /// 응답 상태 코드 — 400 이상이면 에러로 분류
    pub status_code: u16,
    /// 필터 진입부터 완료 신호까지의 지연 (밀리초)
    pub latency_ms: u64,
    /// 자격증명에서 파생한 클라이언트 ID, 없으면 "unknown"
    pub client_id: String,
    /// 원시 API 키 (빈 문자열 가능)
    #[serde(default)]
    pub api_key: String,
    /// 논리적 백엔드 이름
    #[serde(default)]
    pub upstream_service: String,
    /// 매칭된 라우트 ID, 미매칭이면 빈 문자열
    #[serde(default)]
    pub route_id: String,
    /// 레코드 생성 시각
    pub timestamp: DateTime<Utc>,
    /// 에러 태그, 성공 시 없음
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// User-Agent 헤더
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// 원격 주소
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl TelemetryRecord {
    /// 에러 레코드 여부 (상태 코드 400 이상)
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }

    /// 이 레코드의 집계 키 (정규화 적용)
    pub fn aggregation_key(&self) -> AggregationKey {
        AggregationKey::new(&self.path, &self.method)
    }

    /// 인제스트 수용 가능 여부 — path/method/request_id가 모두 있어야 한다
    pub fn is_valid(&self) -> bool {
        !self.request_id.trim().is_empty()
            && !self.path.trim().is_empty()
            && !self.method.trim().is_empty()
    }
}
