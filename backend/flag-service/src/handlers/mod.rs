//! HTTP handlers and route configuration

pub mod audit;
pub mod evaluation;
pub mod flags;

pub use flags::request_identity;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

use crate::state::AppState;

/// Mount the `/api/v1` surface
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/flags")
            .service(
                web::resource("")
                    .route(web::get().to(flags::list_flags))
                    .route(web::post().to(flags::create_flag)),
            )
            .service(
                web::resource("/{key}")
                    .route(web::get().to(flags::get_flag))
                    .route(web::patch().to(flags::update_flag))
                    .route(web::delete().to(flags::delete_flag)),
            )
            .route("/{key}/toggle", web::post().to(flags::toggle_flag))
            .route("/{key}/variants", web::post().to(flags::add_variant))
            .route("/{key}/targets", web::post().to(flags::add_target))
            .route("/{key}/evaluate", web::post().to(evaluation::evaluate_flag))
            .route("/{key}/audit", web::get().to(audit::flag_audit_logs)),
    )
    .service(
        web::scope("/audit")
            .route("/recent", web::get().to(audit::recent_audit_logs))
            .route("/user/{actor}", web::get().to(audit::user_audit_logs)),
    );
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "lowercase")]
enum ComponentStatus {
    Healthy,
    Unhealthy,
}

#[derive(Serialize)]
struct ComponentCheck {
    status: ComponentStatus,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    checks: HashMap<String, ComponentCheck>,
    timestamp: String,
}

async fn check_postgres(state: &AppState) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").fetch_one(&state.db).await.map(|_| ())
}

async fn check_redis(state: &AppState) -> Result<(), redis::RedisError> {
    let mut conn = state.redis.clone();
    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    if pong == "PONG" {
        Ok(())
    } else {
        Err(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "unexpected PING response",
        )))
    }
}

pub async fn health_summary(state: web::Data<AppState>) -> HttpResponse {
    match check_postgres(&state).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "flag-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unhealthy",
            "error": format!("PostgreSQL connection failed: {}", e),
            "service": "flag-service"
        })),
    }
}

pub async fn readiness_summary(state: web::Data<AppState>) -> HttpResponse {
    let mut checks = HashMap::new();
    let mut ready = true;

    let start = Instant::now();
    let pg_check = match check_postgres(&state).await {
        Ok(_) => ComponentCheck {
            status: ComponentStatus::Healthy,
            message: "PostgreSQL connection successful".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            ready = false;
            ComponentCheck {
                status: ComponentStatus::Unhealthy,
                message: format!("PostgreSQL connection failed: {}", e),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            }
        }
    };
    checks.insert("postgresql".to_string(), pg_check);

    // Redis being down degrades cache hit rate but never blocks evaluation,
    // so it does not flip readiness on its own.
    let start = Instant::now();
    let redis_check = match check_redis(&state).await {
        Ok(_) => ComponentCheck {
            status: ComponentStatus::Healthy,
            message: "Redis ping successful".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => ComponentCheck {
            status: ComponentStatus::Unhealthy,
            message: format!("Redis ping failed: {}", e),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
    };
    checks.insert("redis".to_string(), redis_check);

    let response = ReadinessResponse {
        ready,
        checks,
        timestamp: Utc::now().to_rfc3339(),
    };

    if ready {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

pub async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"alive": true}))
}
