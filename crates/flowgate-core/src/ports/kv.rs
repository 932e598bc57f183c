//! 공유 KV 저장소 포트.
//!
//! 레이트리밋 카운터와 메트릭 캐시가 사용하는 좁은 인터페이스.
//! 계약은 Redis 부분집합(INCR, EXPIRE, SET EX, GET, SCAN)을 그대로 따른다.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CoreError;

/// TTL 지원 KV 저장소
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 정수 카운터 증가, 증가 후 값 반환. 키가 없으면 1부터 시작.
    async fn increment(&self, key: &str) -> Result<i64, CoreError>;

    /// 키에 TTL 설정. 키가 없으면 false 반환.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CoreError>;

    /// 값 저장 + TTL 설정 (SET ... EX)
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), CoreError>;

    /// 값 조회. 없거나 만료됐으면 None.
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// 프리픽스로 키 스캔 — 커서 기반, 페이지 단위(100)로 내부 순회.
    /// 전체 키 목록을 한 번에 잠그는 호출은 계약상 금지.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoreError>;

    /// 키 삭제. 존재했으면 true.
    async fn delete(&self, key: &str) -> Result<bool, CoreError>;
}
