use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use redis::aio::ConnectionManager;
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache_invalidation::InvalidationPublisher;
use flag_service::cache::FlagCache;
use flag_service::db;
use flag_service::handlers;
use flag_service::listener::start_invalidation_listener;
use flag_service::services::{AuditService, FlagService};
use flag_service::state::AppState;
use flag_service::websocket::{routes::ws_handler, ConnectionRegistry};
use flag_service::Config;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

/// Flag Service
///
/// Serves feature-flag evaluation and management:
///
/// - `/api/v1/flags/*` - CRUD, variants, targets, evaluation, audit
/// - `/api/v1/audit/*` - cross-flag audit queries
/// - `/ws` - subscribe/unsubscribe/get/evaluate push protocol
///
/// # Architecture
///
/// - PostgreSQL holds flag/variant/target definitions and the audit trail
/// - Redis caches flag definitions (read-through, TTL-bounded) and carries
///   the cross-instance invalidation broadcast over pub/sub
/// - Evaluation is pure and in-process; only definition reads touch I/O
///
/// Multiple instances share the database and broadcast channel; a write on
/// any instance converges all caches within one broadcast round trip.
#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {:#}", e);
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting flag-service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app.env);

    // Initialize database connection pool
    let db_pool = match db::create_pool(&config.database.url, config.database.max_connections).await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {:#}", e);
            eprintln!("ERROR: Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&db_pool).await {
        tracing::error!("Database migration failed: {:#}", e);
        eprintln!("ERROR: Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Connected to database, migrations applied");

    // Initialize Redis: one connection manager for the cache, a publisher
    // and a subscriber for the invalidation broadcast.
    let redis_client = redis::Client::open(config.cache.url.as_str()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to parse REDIS_URL: {e}"),
        )
    })?;
    let redis_manager = ConnectionManager::new(redis_client).await.map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to initialize Redis connection: {e}"),
        )
    })?;

    let flag_cache = FlagCache::new(redis_manager.clone(), config.cache.flag_ttl_secs);

    let publisher = InvalidationPublisher::new(&config.cache.url, config.app.instance_name.clone())
        .await
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to create invalidation publisher: {e}"),
            )
        })?;

    let audit = AuditService::new(db_pool.clone());
    let flags = FlagService::new(
        db_pool.clone(),
        flag_cache.clone(),
        publisher,
        audit.clone(),
    );
    let registry = ConnectionRegistry::new();

    // Long-lived background listener: evicts on broadcast and feeds the
    // WebSocket push notifier.
    let listener_handle = start_invalidation_listener(
        &config.cache.url,
        flag_cache.clone(),
        flags.clone(),
        registry.clone(),
    )
    .await
    .map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to start invalidation listener: {e}"),
        )
    })?;

    let state = AppState {
        config: Arc::new(config.clone()),
        db: db_pool,
        redis: redis_manager,
        cache: flag_cache,
        flags: flags.clone(),
        registry,
    };

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Starting HTTP server at {}", bind_address);

    let state_data = web::Data::new(state);
    let flags_data = web::Data::new(flags);
    let allowed_origins = config.cors.allowed_origins.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default();
        for origin in allowed_origins.split(',') {
            let origin = origin.trim();
            if origin == "*" {
                cors = cors.allow_any_origin();
            } else {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header().max_age(3600);

        App::new()
            .app_data(state_data.clone())
            .app_data(flags_data.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            // Health check endpoints
            .route("/api/v1/health", web::get().to(handlers::health_summary))
            .route(
                "/api/v1/health/ready",
                web::get().to(handlers::readiness_summary),
            )
            .route(
                "/api/v1/health/live",
                web::get().to(handlers::liveness_check),
            )
            // Real-time flag subscription protocol
            .route("/ws", web::get().to(ws_handler))
            .service(web::scope("/api/v1").configure(handlers::configure))
    })
    .bind(&bind_address)?
    .run();

    let server_handle = server.handle();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let result = tokio::select! {
        result = server => result,
        _ = &mut shutdown => {
            tracing::info!("Shutdown signal received");
            server_handle.stop(true).await;
            Ok(())
        }
    };

    listener_handle.abort();
    tracing::info!("Flag-service shutting down");

    result
}
