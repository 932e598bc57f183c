//! 인메모리 KV 어댑터.
//!
//! `KvStore` 포트 구현. 만료는 접근 시점에 게으르게 처리하고,
//! 스캔은 페이지 단위로 잠금을 쪼개서 긴 독점 구간을 만들지 않는다.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use flowgate_core::error::CoreError;
use flowgate_core::ports::kv::KvStore;

/// 스캔 페이지 크기
const SCAN_PAGE_SIZE: usize = 100;

/// 만료 시각이 붙은 엔트리
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// 인메모리 KV 저장소 — `KvStore` 포트 구현
///
/// 프로세스 내장형이므로 다중 인스턴스 조정은 제공하지 않는다.
/// 네트워크 KV로 교체할 때는 같은 포트를 구현하면 된다.
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    /// 새 저장소 생성
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 만료 엔트리 일괄 제거. 제거한 개수 반환.
    ///
    /// 주기적 청소용 — 게으른 만료만으로는 쓰기 없는 키가 남는다.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("만료 엔트리 {removed}개 제거");
        }
        removed
    }

    /// 현재 엔트리 수 (만료 포함)
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// 저장소가 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn increment(&self, key: &str) -> Result<i64, CoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write();

        let next = match entries.get(key) {
            Some(e) if !e.is_expired(now) => {
                let current: i64 = e.value.parse().map_err(|_| {
                    CoreError::Cache(format!("정수가 아닌 값에 increment: {key}"))
                })?;
                current + 1
            }
            // 없거나 만료 → 1부터 시작 (TTL은 호출측이 첫 증가 후 설정)
            _ => 1,
        };

        let expires_at = if next == 1 {
            None
        } else {
            entries.get(key).and_then(|e| e.expires_at)
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(e) if !e.is_expired(now) => {
                e.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoreError> {
        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        // 키 스냅샷을 잡은 뒤 페이지 단위로 생존 확인 — 전체 독점 잠금 회피
        let all_keys: Vec<String> = {
            let entries = self.entries.read();
            entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        };

        let mut alive = Vec::with_capacity(all_keys.len());
        for page in all_keys.chunks(SCAN_PAGE_SIZE) {
            let now = Instant::now();
            let entries = self.entries.read();
            for key in page {
                if entries.get(key).is_some_and(|e| !e.is_expired(now)) {
                    alive.push(key.clone());
                }
            }
        }
        Ok(alive)
    }

    async fn delete(&self, key: &str) -> Result<bool, CoreError> {
        let mut entries = self.entries.write();
        Ok(entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_from_one() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.increment("rate_limit:abc").await.unwrap(), 1);
        assert_eq!(kv.increment("rate_limit:abc").await.unwrap(), 2);
        assert_eq!(kv.increment("rate_limit:abc").await.unwrap(), 3);
        assert_eq!(kv.increment("rate_limit:xyz").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn increment_non_integer_fails() {
        let kv = MemoryKvStore::new();
        kv.set_with_ttl("k", "not-a-number", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(kv.increment("k").await.is_err());
    }

    #[tokio::test]
    async fn expire_and_lazy_removal() {
        let kv = MemoryKvStore::new();
        kv.increment("counter").await.unwrap();
        assert!(kv.expire("counter", Duration::from_millis(20)).await.unwrap());

        assert_eq!(kv.get("counter").await.unwrap().as_deref(), Some("1"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv.get("counter").await.unwrap().is_none());

        // 만료 후 increment는 1부터 다시 시작 — 카운터 윈도우 리셋
        assert_eq!(kv.increment("counter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expire_missing_key() {
        let kv = MemoryKvStore::new();
        assert!(!kv.expire("없는키", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn set_get_with_ttl() {
        let kv = MemoryKvStore::new();
        kv.set_with_ttl("metrics:/a:GET", "{}", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(
            kv.get("metrics:/a:GET").await.unwrap().as_deref(),
            Some("{}")
        );
        assert!(kv.get("metrics:/b:GET").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_filters_prefix_and_expired() {
        let kv = MemoryKvStore::new();
        kv.set_with_ttl("metrics:/a:GET", "1", Duration::from_secs(300))
            .await
            .unwrap();
        kv.set_with_ttl("metrics:/b:POST", "2", Duration::from_secs(300))
            .await
            .unwrap();
        kv.set_with_ttl("metrics:/c:GET", "3", Duration::from_millis(10))
            .await
            .unwrap();
        kv.set_with_ttl("rate_limit:abc", "4", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut keys = kv.scan_prefix("metrics:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["metrics:/a:GET", "metrics:/b:POST"]);
    }

    #[tokio::test]
    async fn scan_over_page_size() {
        let kv = MemoryKvStore::new();
        for i in 0..250 {
            kv.set_with_ttl(&format!("metrics:/e{i}:GET"), "{}", Duration::from_secs(300))
                .await
                .unwrap();
        }
        let keys = kv.scan_prefix("metrics:").await.unwrap();
        assert_eq!(keys.len(), 250);
    }

    #[tokio::test]
    async fn purge_expired_entries() {
        let kv = MemoryKvStore::new();
        kv.set_with_ttl("a", "1", Duration::from_millis(10)).await.unwrap();
        kv.set_with_ttl("b", "2", Duration::from_secs(300)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = kv.purge_expired();
        assert_eq!(removed, 1);
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn delete_key() {
        let kv = MemoryKvStore::new();
        kv.set_with_ttl("k", "v", Duration::from_secs(60)).await.unwrap();
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }
}
