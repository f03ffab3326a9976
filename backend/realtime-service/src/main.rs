use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use realtime_service::{
    config::{Config, StoreBackend},
    db, logging, metrics,
    repository::{InMemoryUserDirectory, Stores},
    routes,
    services::maintenance::spawn_notification_cleanup,
    state::AppState,
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cfg = Config::from_env().context("load configuration")?;

    let stores = match cfg.store_backend {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let pool = db::init_pool(url).await.context("initialize database")?;
            Stores::postgres(pool)
        }
        StoreBackend::Memory => {
            tracing::warn!("STORE_BACKEND=memory: all state is lost on restart");
            Stores::in_memory(Arc::new(InMemoryUserDirectory::permissive()))
        }
    };

    let state = AppState::build(cfg, stores).context("wire application state")?;

    let _cleanup = spawn_notification_cleanup(
        state.notifications.clone(),
        state.list_limiter.clone(),
        state.config.notifications.retention_days,
        state.config.notifications.cleanup_interval,
    );

    let bind_addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    tracing::info!(%bind_addr, "starting realtime-service");

    let rest_state = state.clone();
    HttpServer::new(move || {
        let cors = match rest_state.config.cors_allowed_origin.as_deref() {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header()
                .max_age(3600),
            None => Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600),
        };
        let identity = rest_state.identity.clone();

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(rest_state.clone()))
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::metrics_handler))
            .configure(|cfg| routes::configure(cfg, identity))
    })
    .bind(&bind_addr)
    .with_context(|| format!("bind {bind_addr}"))?
    .run()
    .await
    .context("run HTTP server")?;

    Ok(())
}
