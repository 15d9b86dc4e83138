//! Audit trail query handlers
use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::Result;
use crate::services::FlagService;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

/// Audit entries for one flag, newest first. History survives soft delete.
pub async fn flag_audit_logs(
    service: web::Data<FlagService>,
    key: web::Path<String>,
    query: web::Query<AuditQuery>,
) -> Result<HttpResponse> {
    let entries = service.audit_for_flag(&key, query.limit).await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// Audit entries written by one actor, newest first
pub async fn user_audit_logs(
    service: web::Data<FlagService>,
    actor: web::Path<String>,
    query: web::Query<AuditQuery>,
) -> Result<HttpResponse> {
    let entries = service.audit_by_user(&actor, query.limit).await?;
    Ok(HttpResponse::Ok().json(entries))
}

/// Most recent audit entries across all flags
pub async fn recent_audit_logs(
    service: web::Data<FlagService>,
    query: web::Query<AuditQuery>,
) -> Result<HttpResponse> {
    let entries = service.recent_audit(query.limit).await?;
    Ok(HttpResponse::Ok().json(entries))
}
