//! 메트릭 캐시 저장소.
//!
//! 키당 집계를 `metrics:{path}:{METHOD}`에 JSON으로 저장 (TTL 5분).
//! 컴퓨트 경로는 동기 쓰기 — 대시보드가 곧바로 최신 집계를 읽는다.
//! 전체 열거는 프리픽스 스캔(페이지 100) + 개별 GET.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use flowgate_core::error::CoreError;
use flowgate_core::key::{AggregationKey, METRIC_KEY_PREFIX};
use flowgate_core::models::aggregate::WindowAggregate;
use flowgate_core::ports::kv::KvStore;

/// 집계 캐시 TTL (5분)
const METRIC_TTL: Duration = Duration::from_secs(300);

/// 메트릭 캐시 저장소 — `KvStore` 포트 소비자
#[derive(Clone)]
pub struct MetricCacheRepository {
    kv: Arc<dyn KvStore>,
}

impl MetricCacheRepository {
    /// 새 저장소 생성
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// 집계 동기 저장 (컴퓨트 직후 크리티컬 패스)
    pub async fn save_sync(
        &self,
        key: &AggregationKey,
        aggregate: &WindowAggregate,
    ) -> Result<(), CoreError> {
        let value = serde_json::to_string(aggregate)?;
        self.kv
            .set_with_ttl(&key.cache_key(), &value, METRIC_TTL)
            .await
    }

    /// 집계 비동기 저장 — 실패는 로그만 남긴다
    pub fn save_async(&self, key: AggregationKey, aggregate: WindowAggregate) {
        let repo = self.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.save_sync(&key, &aggregate).await {
                warn!("집계 비동기 저장 실패 ({key}): {e}");
            }
        });
    }

    /// 단일 키 집계 조회
    pub async fn get(
        &self,
        key: &AggregationKey,
    ) -> Result<Option<WindowAggregate>, CoreError> {
        let value = self.kv.get(&key.cache_key()).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// 전체 집계 열거.
    ///
    /// 캐시 장애나 역직렬화 실패는 건너뛴다 — 대시보드는 빈 목록이라도 받는다.
    pub async fn get_all(&self) -> Vec<WindowAggregate> {
        let keys = match self.kv.scan_prefix(METRIC_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("메트릭 키 스캔 실패: {e}");
                return Vec::new();
            }
        };

        let mut aggregates = Vec::with_capacity(keys.len());
        for key in keys {
            match self.kv.get(&key).await {
                Ok(Some(json)) => match serde_json::from_str::<WindowAggregate>(&json) {
                    Ok(agg) => aggregates.push(agg),
                    Err(e) => debug!("집계 역직렬화 실패 ({key}): {e}"),
                },
                Ok(None) => {} // 스캔과 GET 사이에 만료됨
                Err(e) => debug!("집계 조회 실패 ({key}): {e}"),
            }
        }
        aggregates
    }
}
