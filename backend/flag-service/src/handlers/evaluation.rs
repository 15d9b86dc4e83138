//! Evaluation handler - the hot read path
use actix_web::{web, HttpResponse};

use crate::error::Result;
use crate::models::EvaluationContext;
use crate::services::FlagService;

/// Evaluate a flag against a caller-supplied context.
///
/// A nonexistent or soft-deleted flag is a 404, distinct from a flag that
/// evaluates to false.
pub async fn evaluate_flag(
    service: web::Data<FlagService>,
    key: web::Path<String>,
    ctx: web::Json<EvaluationContext>,
) -> Result<HttpResponse> {
    let result = service.evaluate(&key, &ctx).await?;
    Ok(HttpResponse::Ok().json(result))
}
