//! 스키마 마이그레이션.

use rusqlite::Connection;

/// 스키마 버전 — 변경 시 마이그레이션 단계 추가
const SCHEMA_VERSION: i64 = 1;

/// 마이그레이션 실행. 멱등.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS telemetry_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL UNIQUE,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                client_id TEXT NOT NULL,
                api_key TEXT NOT NULL DEFAULT '',
                upstream_service TEXT NOT NULL DEFAULT '',
                route_id TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                error_type TEXT,
                user_agent TEXT,
                ip_address TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON telemetry_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_path ON telemetry_events(path);
            CREATE INDEX IF NOT EXISTS idx_events_client_id ON telemetry_events(client_id);
            CREATE INDEX IF NOT EXISTS idx_events_status_code ON telemetry_events(status_code);
            ",
        )?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
