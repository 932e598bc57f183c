//! SQLite 저장소 어댑터.
//!
//! `EventStore` 포트 구현. 배치 삽입은 단일 트랜잭션이며, uniqueness 제약
//! 위반으로 전체가 거부되면 `Duplicate` 에러를 반환한다 — 호출측(원시 싱크)이
//! 개별 삽입 폴백을 수행한다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use flowgate_core::error::CoreError;
use flowgate_core::models::telemetry::TelemetryRecord;
use flowgate_core::ports::event_store::{EndpointCount, EventStore};

use crate::migration;

/// SQLite 원시 이벤트 저장소 — `EventStore` 포트 구현
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

/// rusqlite 에러를 CoreError로 매핑.
/// 제약 위반은 `Duplicate`, 나머지는 `Storage`.
fn map_sql_error(context: &str, e: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &e {
        if ffi_err.code == ErrorCode::ConstraintViolation {
            return CoreError::Duplicate(format!("{context}: {e}"));
        }
    }
    CoreError::Storage(format!("{context}: {e}"))
}

impl SqliteEventStore {
    /// 파일 기반 저장소 생성
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::Storage(format!("SQLite 열기 실패: {e}")))?;

        // 고처리량 삽입용 PRAGMA 설정
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=8000;
            PRAGMA temp_store=MEMORY;
            ",
        )
        .map_err(|e| CoreError::Storage(format!("PRAGMA 설정 실패: {e}")))?;

        migration::run_migrations(&conn)
            .map_err(|e| CoreError::Storage(format!("마이그레이션 실패: {e}")))?;

        info!("SQLite 이벤트 저장소 초기화: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 인메모리 저장소 생성 (테스트용)
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Storage(format!("인메모리 SQLite 생성 실패: {e}")))?;

        migration::run_migrations(&conn)
            .map_err(|e| CoreError::Storage(format!("마이그레이션 실패: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|e| CoreError::Storage(format!("잠금 획득 실패: {e}")))
    }
}

const INSERT_SQL: &str = "INSERT INTO telemetry_events \
    (request_id, path, method, status_code, latency_ms, client_id, api_key, \
     upstream_service, route_id, timestamp, error_type, user_agent, ip_address, created_at) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

const INSERT_OR_IGNORE_SQL: &str = "INSERT OR IGNORE INTO telemetry_events \
    (request_id, path, method, status_code, latency_ms, client_id, api_key, \
     upstream_service, route_id, timestamp, error_type, user_agent, ip_address, created_at) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

/// INSERT 파라미터 바인딩 — save_batch/save_one 공용
macro_rules! insert_params {
    ($record:expr, $created_at:expr) => {
        rusqlite::params![
            $record.request_id,
            $record.path,
            $record.method,
            $record.status_code as i64,
            $record.latency_ms as i64,
            $record.client_id,
            $record.api_key,
            $record.upstream_service,
            $record.route_id,
            $record.timestamp.to_rfc3339(),
            $record.error_type,
            $record.user_agent,
            $record.ip_address,
            $created_at,
        ]
    };
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<TelemetryRecord, rusqlite::Error> {
    let ts_str: String = row.get(9)?;
    let timestamp = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(TelemetryRecord {
        request_id: row.get(0)?,
        path: row.get(1)?,
        method: row.get(2)?,
        status_code: row.get::<_, i64>(3)? as u16,
        latency_ms: row.get::<_, i64>(4)? as u64,
        client_id: row.get(5)?,
        api_key: row.get(6)?,
        upstream_service: row.get(7)?,
        route_id: row.get(8)?,
        timestamp,
        error_type: row.get(10)?,
        user_agent: row.get(11)?,
        ip_address: row.get(12)?,
    })
}

const SELECT_COLUMNS: &str = "request_id, path, method, status_code, latency_ms, client_id, \
    api_key, upstream_service, route_id, timestamp, error_type, user_agent, ip_address";

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn save_batch(&self, records: &[TelemetryRecord]) -> Result<usize, CoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let created_at = Utc::now().to_rfc3339();
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| map_sql_error("트랜잭션 시작 실패", e))?;

        {
            let mut stmt = tx
                .prepare_cached(INSERT_SQL)
                .map_err(|e| map_sql_error("삽입 준비 실패", e))?;
            for record in records {
                stmt.execute(insert_params!(record, created_at))
                    .map_err(|e| map_sql_error("배치 삽입 실패", e))?;
            }
        }

        tx.commit()
            .map_err(|e| map_sql_error("트랜잭션 커밋 실패", e))?;
        Ok(records.len())
    }

    async fn save_one(&self, record: &TelemetryRecord) -> Result<bool, CoreError> {
        let created_at = Utc::now().to_rfc3339();
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(INSERT_OR_IGNORE_SQL, insert_params!(record, created_at))
            .map_err(|e| map_sql_error("단건 삽입 실패", e))?;
        Ok(changed == 1)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, CoreError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM telemetry_events WHERE timestamp >= ?1",
                rusqlite::params![since.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| map_sql_error("카운트 조회 실패", e))?;
        Ok(count as u64)
    }

    async fn top_endpoints(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EndpointCount>, CoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT path, COUNT(*) as cnt FROM telemetry_events \
                 WHERE timestamp >= ?1 GROUP BY path ORDER BY cnt DESC LIMIT ?2",
            )
            .map_err(|e| map_sql_error("쿼리 준비 실패", e))?;

        let rows = stmt
            .query_map(
                rusqlite::params![since.to_rfc3339(), limit as i64],
                |row| {
                    Ok(EndpointCount {
                        endpoint: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .map_err(|e| map_sql_error("쿼리 실행 실패", e))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    async fn recent_events(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TelemetryRecord>, CoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM telemetry_events \
                 WHERE timestamp >= ?1 ORDER BY timestamp DESC LIMIT ?2"
            ))
            .map_err(|e| map_sql_error("쿼리 준비 실패", e))?;

        let events = stmt
            .query_map(
                rusqlite::params![since.to_rfc3339(), limit as i64],
                row_to_record,
            )
            .map_err(|e| map_sql_error("쿼리 실행 실패", e))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn make_record(path: &str, status: u16) -> TelemetryRecord {
        TelemetryRecord {
            request_id: Uuid::new_v4().to_string(),
            path: path.to_string(),
            method: "GET".to_string(),
            status_code: status,
            latency_ms: 42,
            client_id: "abcdefgh".to_string(),
            api_key: String::new(),
            upstream_service: "user-service".to_string(),
            route_id: "user-service".to_string(),
            timestamp: Utc::now(),
            error_type: None,
            user_agent: Some("traffic-gen/1.0".to_string()),
            ip_address: Some("127.0.0.1".to_string()),
        }
    }

    #[tokio::test]
    async fn batch_save_and_count() {
        let store = SqliteEventStore::open_in_memory().unwrap();

        let records: Vec<_> = (0..100).map(|_| make_record("/api/users", 200)).collect();
        let saved = store.save_batch(&records).await.unwrap();
        assert_eq!(saved, 100);

        let since = Utc::now() - Duration::seconds(60);
        assert_eq!(store.count_since(since).await.unwrap(), 100);

        // 미래 기준으로는 0
        let future = Utc::now() + Duration::seconds(60);
        assert_eq!(store.count_since(future).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_batch_rejected_whole() {
        let store = SqliteEventStore::open_in_memory().unwrap();

        let record = make_record("/api/users", 200);
        store.save_batch(&[record.clone()]).await.unwrap();

        // 같은 request_id가 포함된 배치 → 전체 거부 + Duplicate
        let fresh = make_record("/api/orders", 200);
        let result = store.save_batch(&[fresh.clone(), record]).await;
        assert!(matches!(result, Err(CoreError::Duplicate(_))));

        // 트랜잭션 롤백으로 fresh도 저장되지 않음
        let since = Utc::now() - Duration::seconds(60);
        assert_eq!(store.count_since(since).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_one_skips_duplicates() {
        let store = SqliteEventStore::open_in_memory().unwrap();

        let record = make_record("/api/users", 200);
        assert!(store.save_one(&record).await.unwrap());
        assert!(!store.save_one(&record).await.unwrap());

        let since = Utc::now() - Duration::seconds(60);
        assert_eq!(store.count_since(since).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn top_endpoints_ordering() {
        let store = SqliteEventStore::open_in_memory().unwrap();

        for _ in 0..5 {
            store.save_one(&make_record("/api/users", 200)).await.unwrap();
        }
        for _ in 0..3 {
            store.save_one(&make_record("/api/orders", 200)).await.unwrap();
        }
        store.save_one(&make_record("/api/payments", 200)).await.unwrap();

        let since = Utc::now() - Duration::seconds(60);
        let top = store.top_endpoints(since, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].endpoint, "/api/users");
        assert_eq!(top[0].count, 5);
        assert_eq!(top[1].endpoint, "/api/orders");
        assert_eq!(top[1].count, 3);
    }

    #[tokio::test]
    async fn recent_events_roundtrip() {
        let store = SqliteEventStore::open_in_memory().unwrap();

        let mut record = make_record("/api/users", 502);
        record.error_type = Some("UpstreamConnect".to_string());
        store.save_one(&record).await.unwrap();

        let since = Utc::now() - Duration::seconds(60);
        let events = store.recent_events(since, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request_id, record.request_id);
        assert_eq!(events[0].status_code, 502);
        assert_eq!(events[0].error_type.as_deref(), Some("UpstreamConnect"));
        assert_eq!(events[0].user_agent.as_deref(), Some("traffic-gen/1.0"));
    }

    #[tokio::test]
    async fn empty_batch_noop() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        assert_eq!(store.save_batch(&[]).await.unwrap(), 0);
    }
}
