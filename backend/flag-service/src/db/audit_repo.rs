//! Repository for the append-only audit trail.
//!
//! Rows are only ever inserted; there is no update or delete path. Queries
//! are newest-first and always bounded by an explicit limit.

use crate::models::AuditLogEntry;
use sqlx::PgPool;
use uuid::Uuid;

const AUDIT_COLUMNS: &str =
    "id, flag_id, action, actor_id, payload, ip_address, user_agent, created_at";

/// Append one audit entry
#[allow(clippy::too_many_arguments)]
pub async fn append_entry(
    pool: &PgPool,
    flag_id: Uuid,
    action: &str,
    actor_id: Option<&str>,
    payload: Option<&serde_json::Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<AuditLogEntry, sqlx::Error> {
    let entry = sqlx::query_as::<_, AuditLogEntry>(&format!(
        r#"
        INSERT INTO flag_audit_logs (flag_id, action, actor_id, payload, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {AUDIT_COLUMNS}
        "#,
    ))
    .bind(flag_id)
    .bind(action)
    .bind(actor_id)
    .bind(payload)
    .bind(ip_address)
    .bind(user_agent)
    .fetch_one(pool)
    .await?;

    Ok(entry)
}

/// Entries for one flag, newest first
pub async fn list_for_flag(
    pool: &PgPool,
    flag_id: Uuid,
    limit: i64,
) -> Result<Vec<AuditLogEntry>, sqlx::Error> {
    let entries = sqlx::query_as::<_, AuditLogEntry>(&format!(
        r#"
        SELECT {AUDIT_COLUMNS}
        FROM flag_audit_logs
        WHERE flag_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    ))
    .bind(flag_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Entries written by one actor, newest first
pub async fn list_by_actor(
    pool: &PgPool,
    actor_id: &str,
    limit: i64,
) -> Result<Vec<AuditLogEntry>, sqlx::Error> {
    let entries = sqlx::query_as::<_, AuditLogEntry>(&format!(
        r#"
        SELECT {AUDIT_COLUMNS}
        FROM flag_audit_logs
        WHERE actor_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    ))
    .bind(actor_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Most recent entries across all flags
pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<AuditLogEntry>, sqlx::Error> {
    let entries = sqlx::query_as::<_, AuditLogEntry>(&format!(
        r#"
        SELECT {AUDIT_COLUMNS}
        FROM flag_audit_logs
        ORDER BY created_at DESC, id DESC
        LIMIT $1
        "#,
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
