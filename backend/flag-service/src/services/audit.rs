//! Append-only audit trail service.
//!
//! `log` must never fail the mutation that triggered it: write failures are
//! caught here, logged and dropped. Queries are bounded to keep result sets
//! from growing without limit.

use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::db::audit_repo;
use crate::error::Result;
use crate::models::{AuditAction, AuditLogEntry, RequestMetadata};

const MAX_QUERY_LIMIT: i64 = 500;
const DEFAULT_QUERY_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one change. Swallows its own failures.
    pub async fn log(
        &self,
        flag_id: Uuid,
        action: AuditAction,
        actor_id: Option<&str>,
        payload: Option<serde_json::Value>,
        metadata: &RequestMetadata,
    ) {
        let result = audit_repo::append_entry(
            &self.pool,
            flag_id,
            action.as_str(),
            actor_id,
            payload.as_ref(),
            metadata.ip_address.as_deref(),
            metadata.user_agent.as_deref(),
        )
        .await;

        if let Err(e) = result {
            error!(
                flag_id = %flag_id,
                action = %action,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }

    pub async fn logs_for_flag(
        &self,
        flag_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<AuditLogEntry>> {
        let entries = audit_repo::list_for_flag(&self.pool, flag_id, clamp_limit(limit)).await?;
        Ok(entries)
    }

    pub async fn logs_by_user(
        &self,
        actor_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<AuditLogEntry>> {
        let entries = audit_repo::list_by_actor(&self.pool, actor_id, clamp_limit(limit)).await?;
        Ok(entries)
    }

    pub async fn recent_logs(&self, limit: Option<i64>) -> Result<Vec<AuditLogEntry>> {
        let entries = audit_repo::list_recent(&self.pool, clamp_limit(limit)).await?;
        Ok(entries)
    }
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_QUERY_LIMIT);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_QUERY_LIMIT);
    }
}
