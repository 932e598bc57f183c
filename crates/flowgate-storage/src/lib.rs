//! # flowgate-storage
//!
//! SQLite 기반 원시 이벤트 저장소.
//! `EventStore` 포트 구현 — 배치 삽입, 60초 윈도우 카운트, 상위 엔드포인트 조회.

mod migration;
pub mod sqlite;

pub use sqlite::SqliteEventStore;
