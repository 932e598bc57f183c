//! # flowgate-cache
//!
//! `KvStore` 포트 어댑터.
//! 레이트리밋 카운터(`rate_limit:{client}`, TTL 60초)와 메트릭 캐시
//! (`metrics:{key}`, TTL 300초)가 이 포트 위에서 동작한다.

pub mod memory;

pub use memory::MemoryKvStore;
