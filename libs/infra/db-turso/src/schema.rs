// [libs/infra/db-turso/src/schema.rs]
/*!
 * =================================================================
 * APARATO: DATABASE SCHEMA (V1.0 - RECONCILIATION CORE)
 * CLASIFICACION: INFRASTRUCTURE LAYER (ESTRATO L3)
 * RESPONSABILIDAD: GOBERNANZA ESTRUCTURAL E IDEMPOTENCIA TOTAL
 *
 * Todas las sentencias son `CREATE ... IF NOT EXISTS`: el bootstrap se
 * ejecuta en cada arranque del proceso y nunca falla sobre un esquema
 * ya presente.
 * =================================================================
 */

use crate::errors::DbError;
use libsql::Connection;
use tracing::{debug, info, instrument};

const CORE_TABLES: &[(&str, &str)] = &[
    (
        "TABLE_CIS",
        r#"
        CREATE TABLE IF NOT EXISTS cis (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            ci_type TEXT NOT NULL,
            source TEXT NOT NULL,
            owner TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            attributes TEXT NOT NULL DEFAULT '{}',
            last_seen_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    ),
    (
        "TABLE_IDENTITIES",
        r#"
        CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            ci_id TEXT NOT NULL REFERENCES cis(id) ON DELETE CASCADE,
            scheme TEXT NOT NULL,
            value TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (scheme, value),
            UNIQUE (ci_id, scheme, value)
        );
    "#,
    ),
    (
        "TABLE_RELATIONSHIPS",
        r#"
        CREATE TABLE IF NOT EXISTS relationships (
            id TEXT PRIMARY KEY,
            source_ci_id TEXT NOT NULL REFERENCES cis(id) ON DELETE CASCADE,
            target_ci_id TEXT NOT NULL REFERENCES cis(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (source_ci_id, target_ci_id, relation_type)
        );
    "#,
    ),
    (
        "TABLE_AUDIT_EVENTS",
        r#"
        CREATE TABLE IF NOT EXISTS audit_events (
            id TEXT PRIMARY KEY,
            ci_id TEXT REFERENCES cis(id) ON DELETE SET NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
    "#,
    ),
    (
        "TABLE_GOVERNANCE_COLLISIONS",
        r#"
        CREATE TABLE IF NOT EXISTS governance_collisions (
            id TEXT PRIMARY KEY,
            scheme TEXT NOT NULL,
            value TEXT NOT NULL,
            existing_ci_id TEXT NOT NULL,
            incoming_ci_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            resolution_note TEXT,
            resolved_at TEXT,
            created_at TEXT NOT NULL
        );
    "#,
    ),
    (
        "TABLE_SYNC_STATE",
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    ),
    (
        "TABLE_SYNC_JOBS",
        r#"
        CREATE TABLE IF NOT EXISTS sync_jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'QUEUED',
            requested_by TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            result TEXT,
            last_error TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 5,
            next_run_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    ),
    (
        "TABLE_CHANGE_APPROVALS",
        r#"
        CREATE TABLE IF NOT EXISTS change_approvals (
            id TEXT PRIMARY KEY,
            method TEXT NOT NULL,
            request_path TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            payload_preview TEXT NOT NULL DEFAULT '{}',
            reason TEXT,
            requested_by TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            decided_by TEXT,
            decision_note TEXT,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            decided_at TEXT,
            consumed_at TEXT
        );
    "#,
    ),
];

const ACCELERATION_INDEXES: &[(&str, &str)] = &[
    ("IDX_IDENTITIES_CI", "CREATE INDEX IF NOT EXISTS idx_identities_ci ON identities(ci_id);"),
    ("IDX_RELATIONSHIPS_SOURCE", "CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_ci_id);"),
    ("IDX_RELATIONSHIPS_TARGET", "CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_ci_id);"),
    ("IDX_AUDIT_CI", "CREATE INDEX IF NOT EXISTS idx_audit_ci ON audit_events(ci_id);"),
    ("IDX_AUDIT_CREATED", "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_events(created_at);"),
    ("IDX_COLLISIONS_STATUS", "CREATE INDEX IF NOT EXISTS idx_collisions_status ON governance_collisions(status);"),
    ("IDX_COLLISIONS_QUAD", "CREATE INDEX IF NOT EXISTS idx_collisions_quad ON governance_collisions(scheme, value, existing_ci_id, incoming_ci_id);"),
    ("IDX_SYNC_JOBS_CLAIM", "CREATE INDEX IF NOT EXISTS idx_sync_jobs_claim ON sync_jobs(status, next_run_at);"),
    ("IDX_SYNC_JOBS_TYPE", "CREATE INDEX IF NOT EXISTS idx_sync_jobs_type ON sync_jobs(job_type, requested_by, status);"),
    ("IDX_APPROVALS_STATUS", "CREATE INDEX IF NOT EXISTS idx_approvals_status ON change_approvals(status, expires_at);"),
    ("IDX_CIS_STATUS", "CREATE INDEX IF NOT EXISTS idx_cis_status ON cis(status);"),
    ("IDX_CIS_LAST_SEEN", "CREATE INDEX IF NOT EXISTS idx_cis_last_seen ON cis(last_seen_at);"),
];

/// Aplica el esquema completo de forma idempotente sobre la conexion dada.
#[instrument(skip(database_connection))]
pub async fn apply_full_schema(database_connection: &Connection) -> Result<(), DbError> {
    for (identifier, sql) in CORE_TABLES {
        debug!("applying schema fragment {identifier}");
        database_connection
            .execute(sql, ())
            .await
            .map_err(|e| DbError::ConnectionError(format!("{identifier}: {e}")))?;
    }

    for (identifier, sql) in ACCELERATION_INDEXES {
        debug!("applying index fragment {identifier}");
        database_connection
            .execute(sql, ())
            .await
            .map_err(|e| DbError::ConnectionError(format!("{identifier}: {e}")))?;
    }

    info!("schema bootstrap complete ({} tables, {} indexes)", CORE_TABLES.len(), ACCELERATION_INDEXES.len());
    Ok(())
}
