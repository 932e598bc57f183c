//! 지연 분위수 다이제스트 레지스트리.
//!
//! 키당 t-digest 하나 (압축 100, 메모리 유계). 맵은 키 해시로 8개 스트라이프로
//! 분할되어 있어 쓰기 경합이 코어 수에 비례해 분산된다. 각 스트라이프 안에서
//! 다이제스트 갱신은 쓰기 잠금으로 직렬화된다.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tdigest::TDigest;

/// 스트라이프 수
const STRIPE_COUNT: usize = 8;

/// t-digest 압축 계수 — [0.5, 0.99] 분위수에서 유계 상대 오차
const DIGEST_COMPRESSION: usize = 100;

/// 관측 수를 함께 추적하는 다이제스트 래퍼.
/// 빈 다이제스트 분위수 질의를 감지할 수 있어야 폴백 경로가 동작한다.
struct LatencyDigest {
    digest: TDigest,
    count: u64,
}

impl LatencyDigest {
    fn new() -> Self {
        Self {
            digest: TDigest::new_with_size(DIGEST_COMPRESSION),
            count: 0,
        }
    }

    fn add(&mut self, value: f64) {
        let digest = std::mem::replace(&mut self.digest, TDigest::new_with_size(DIGEST_COMPRESSION));
        self.digest = digest.merge_unsorted(vec![value]);
        self.count += 1;
    }

    fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.digest.estimate_quantile(q).max(0.0))
        }
    }
}

/// 키별 스트리밍 분위수 레지스트리
pub struct DigestRegistry {
    stripes: Vec<RwLock<HashMap<String, LatencyDigest>>>,
}

impl DigestRegistry {
    /// 새 레지스트리 생성
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn stripe(&self, key: &str) -> &RwLock<HashMap<String, LatencyDigest>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % STRIPE_COUNT]
    }

    /// 키의 다이제스트에 지연값 추가. 첫 관측이면 다이제스트 생성.
    pub fn add(&self, key: &str, latency_ms: f64) {
        let mut map = self.stripe(key).write();
        map.entry(key.to_string())
            .or_insert_with(LatencyDigest::new)
            .add(latency_ms);
    }

    /// 분위수 질의. 다이제스트가 없거나 비었으면 None — 호출측이 정렬 폴백.
    pub fn quantile(&self, key: &str, q: f64) -> Option<f64> {
        let map = self.stripe(key).read();
        map.get(key).and_then(|d| d.quantile(q))
    }

    /// p50/p90/p99 일괄 질의
    pub fn percentiles(&self, key: &str) -> Option<(f64, f64, f64)> {
        let map = self.stripe(key).read();
        let digest = map.get(key)?;
        Some((
            digest.quantile(0.50)?,
            digest.quantile(0.90)?,
            digest.quantile(0.99)?,
        ))
    }

    /// 키의 다이제스트 제거 (이벤트 버퍼가 비었을 때)
    pub fn remove(&self, key: &str) -> bool {
        self.stripe(key).write().remove(key).is_some()
    }

    /// 키 존재 여부
    pub fn contains(&self, key: &str) -> bool {
        self.stripe(key).read().contains_key(key)
    }

    /// 전체 다이제스트 수
    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.read().len()).sum()
    }

    /// 레지스트리가 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DigestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
