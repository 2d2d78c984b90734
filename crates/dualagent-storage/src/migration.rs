//! 스키마 마이그레이션.
//!
//! 버전 기반 SQLite 스키마 관리.

use rusqlite::Connection;
use tracing::{debug, info};

/// 현재 스키마 버전
pub const CURRENT_VERSION: u32 = 3;

/// 스키마 마이그레이션 실행
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = get_version(conn)?;
    info!("현재 스키마 버전: {current}, 목표: {CURRENT_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    if current < 2 {
        migrate_v2(conn)?;
    }

    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// 현재 스키마 버전 조회
pub fn get_version(conn: &Connection) -> Result<u32, rusqlite::Error> {
    let result: Result<u32, _> = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    );
    result.or(Ok(0))
}

/// V1: dual_agent_metrics 테이블
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    debug!("마이그레이션 V1 실행: dual_agent_metrics 테이블");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dual_agent_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            event_timestamp TEXT NOT NULL,
            trace_id TEXT,
            session_id TEXT,
            user_id TEXT,
            environment TEXT,
            server_name TEXT,
            app_version TEXT,

            -- request
            method TEXT,
            url TEXT,
            route_name TEXT,
            route_path TEXT,
            status_code INTEGER,
            duration REAL,
            memory_usage INTEGER,
            request_size INTEGER,
            response_size INTEGER,
            bootstrap_time REAL,
            before_middleware_time REAL,
            action_time REAL,
            render_time REAL,
            after_middleware_time REAL,
            terminating_time REAL,

            -- query
            sql_query TEXT,
            connection_name TEXT,
            query_time REAL,
            bindings TEXT,

            -- exception
            exception_class TEXT,
            exception_message TEXT,
            file TEXT,
            line INTEGER,
            stack_trace TEXT,

            -- job
            job_class TEXT,
            queue TEXT,
            job_status TEXT,
            attempts INTEGER,
            job_duration REAL,

            -- cache
            cache_key TEXT,
            cache_operation TEXT,
            cache_store TEXT,

            -- mail
            mail_class TEXT,
            mail_to TEXT,
            mail_subject TEXT,

            -- log
            log_level TEXT,
            log_message TEXT,
            log_context TEXT,

            custom_metadata TEXT,
            raw_payload TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_dam_event_type_ts ON dual_agent_metrics(event_type, event_timestamp);
        CREATE INDEX IF NOT EXISTS idx_dam_ts ON dual_agent_metrics(event_timestamp);
        CREATE INDEX IF NOT EXISTS idx_dam_trace_id ON dual_agent_metrics(trace_id);
        CREATE INDEX IF NOT EXISTS idx_dam_user_id ON dual_agent_metrics(user_id);
        CREATE INDEX IF NOT EXISTS idx_dam_status_code ON dual_agent_metrics(status_code);
        CREATE INDEX IF NOT EXISTS idx_dam_exception_class ON dual_agent_metrics(exception_class);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;

    info!("마이그레이션 V1 완료");
    Ok(())
}

/// V2: dual_agent_aggregated_metrics 테이블
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    debug!("마이그레이션 V2 실행: dual_agent_aggregated_metrics 테이블");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dual_agent_aggregated_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            granularity TEXT NOT NULL,
            event_type TEXT NOT NULL,
            metric_date TEXT NOT NULL,
            metric_hour INTEGER,

            total_events INTEGER NOT NULL DEFAULT 0,
            unique_users INTEGER NOT NULL DEFAULT 0,
            unique_sessions INTEGER NOT NULL DEFAULT 0,

            avg_duration REAL,
            min_duration REAL,
            max_duration REAL,
            p95_duration REAL,
            p99_duration REAL,

            status_2xx INTEGER NOT NULL DEFAULT 0,
            status_3xx INTEGER NOT NULL DEFAULT 0,
            status_4xx INTEGER NOT NULL DEFAULT 0,
            status_5xx INTEGER NOT NULL DEFAULT 0,

            total_queries INTEGER NOT NULL DEFAULT 0,
            avg_query_duration REAL,

            total_exceptions INTEGER NOT NULL DEFAULT 0,
            top_exceptions TEXT NOT NULL DEFAULT '[]',

            jobs_queued INTEGER NOT NULL DEFAULT 0,
            jobs_completed INTEGER NOT NULL DEFAULT 0,
            jobs_failed INTEGER NOT NULL DEFAULT 0,

            avg_memory_usage INTEGER,
            peak_memory_usage INTEGER,

            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(granularity, event_type, metric_date, metric_hour)
        );

        CREATE INDEX IF NOT EXISTS idx_daam_date ON dual_agent_aggregated_metrics(metric_date, granularity);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;

    info!("마이그레이션 V2 완료");
    Ok(())
}

/// V3: ingest_buffer 테이블 (프로세스 간 공유 버퍼)
fn migrate_v3(conn: &Connection) -> Result<(), rusqlite::Error> {
    debug!("마이그레이션 V3 실행: ingest_buffer 테이블");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ingest_buffer (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload TEXT NOT NULL,
            buffered_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ingest_buffer_buffered_at ON ingest_buffer(buffered_at);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )?;

    info!("마이그레이션 V3 완료");
    Ok(())
}
