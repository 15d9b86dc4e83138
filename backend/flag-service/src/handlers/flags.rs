//! Flag CRUD handlers - HTTP endpoints for flag management
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use validator::Validate;

use crate::error::Result;
use crate::models::{FlagType, RequestMetadata, TargetType};
use crate::services::{FlagPatch, FlagService, NewFlag, NewTarget, NewVariant};

/// Actor identity and request metadata recorded with every mutation.
///
/// Authentication lives in front of this service; at this layer the actor
/// id is trusted from the `X-Actor-Id` header.
pub fn request_identity(req: &HttpRequest) -> (Option<String>, RequestMetadata) {
    let actor = req
        .headers()
        .get("X-Actor-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let metadata = RequestMetadata {
        ip_address: req
            .connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string()),
        user_agent: req
            .headers()
            .get(actix_web::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
    };

    (actor, metadata)
}

#[derive(Debug, Deserialize)]
pub struct ListFlagsQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

/// List flags (soft-deleted ones only on request)
pub async fn list_flags(
    service: web::Data<FlagService>,
    query: web::Query<ListFlagsQuery>,
) -> Result<HttpResponse> {
    let flags = service.list_flags(query.include_deleted).await?;
    Ok(HttpResponse::Ok().json(flags))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFlagRequest {
    /// Slug shape is enforced at the coordinator boundary
    #[validate(length(min = 1, max = 64))]
    pub key: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub description: Option<String>,
    pub flag_type: FlagType,
    #[serde(default)]
    #[validate(range(min = 0, max = 100))]
    pub rollout_percentage: i32,
}

/// Create a new flag
pub async fn create_flag(
    service: web::Data<FlagService>,
    req: HttpRequest,
    body: web::Json<CreateFlagRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let (actor, metadata) = request_identity(&req);

    let flag = service
        .create_flag(
            NewFlag {
                key: body.key.clone(),
                name: body.name.clone(),
                description: body.description.clone(),
                flag_type: body.flag_type,
                rollout_percentage: body.rollout_percentage,
            },
            actor.as_deref(),
            &metadata,
        )
        .await?;

    Ok(HttpResponse::Created().json(flag))
}

/// Get a flag with its variants and targets
pub async fn get_flag(
    service: web::Data<FlagService>,
    key: web::Path<String>,
) -> Result<HttpResponse> {
    let flag = service.find_by_key(&key).await?;
    Ok(HttpResponse::Ok().json(flag))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateFlagRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    #[validate(range(min = 0, max = 100))]
    pub rollout_percentage: Option<i32>,
}

/// Update flag fields; absent fields are left unchanged
pub async fn update_flag(
    service: web::Data<FlagService>,
    req: HttpRequest,
    key: web::Path<String>,
    body: web::Json<UpdateFlagRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let (actor, metadata) = request_identity(&req);

    let flag = service
        .update_flag(
            &key,
            FlagPatch {
                name: body.name.clone(),
                description: body.description.clone(),
                enabled: body.enabled,
                rollout_percentage: body.rollout_percentage,
            },
            actor.as_deref(),
            &metadata,
        )
        .await?;

    Ok(HttpResponse::Ok().json(flag))
}

/// Flip a flag's enabled bit
pub async fn toggle_flag(
    service: web::Data<FlagService>,
    req: HttpRequest,
    key: web::Path<String>,
) -> Result<HttpResponse> {
    let (actor, metadata) = request_identity(&req);
    let flag = service.toggle_flag(&key, actor.as_deref(), &metadata).await?;
    Ok(HttpResponse::Ok().json(flag))
}

/// Soft-delete a flag
pub async fn delete_flag(
    service: web::Data<FlagService>,
    req: HttpRequest,
    key: web::Path<String>,
) -> Result<HttpResponse> {
    let (actor, metadata) = request_identity(&req);
    service.delete_flag(&key, actor.as_deref(), &metadata).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddVariantRequest {
    #[validate(length(min = 1, max = 64))]
    pub key: String,
    /// Opaque payload; structured values are stored as JSON text
    pub value: serde_json::Value,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub weight: i32,
}

/// Append a variant to a flag
pub async fn add_variant(
    service: web::Data<FlagService>,
    req: HttpRequest,
    key: web::Path<String>,
    body: web::Json<AddVariantRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let (actor, metadata) = request_identity(&req);

    // Plain strings are stored raw so they round-trip as strings.
    let value = match &body.value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let variant = service
        .add_variant(
            &key,
            NewVariant {
                key: body.key.clone(),
                value,
                weight: body.weight,
            },
            actor.as_deref(),
            &metadata,
        )
        .await?;

    Ok(HttpResponse::Created().json(variant))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddTargetRequest {
    pub target_type: TargetType,
    #[validate(length(min = 1, max = 255))]
    pub target_value: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[validate(range(min = 0, max = 100))]
    pub percentage: Option<i32>,
    pub variant_key: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

/// Append a targeting rule to a flag
pub async fn add_target(
    service: web::Data<FlagService>,
    req: HttpRequest,
    key: web::Path<String>,
    body: web::Json<AddTargetRequest>,
) -> Result<HttpResponse> {
    body.validate()?;
    let (actor, metadata) = request_identity(&req);

    let target = service
        .add_target(
            &key,
            NewTarget {
                target_type: body.target_type,
                target_value: body.target_value.clone(),
                enabled: body.enabled,
                percentage: body.percentage,
                variant_key: body.variant_key.clone(),
                priority: body.priority,
            },
            actor.as_deref(),
            &metadata,
        )
        .await?;

    Ok(HttpResponse::Created().json(target))
}
