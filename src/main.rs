use axum::{middleware, routing::get, Json, Router};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod agencies;
mod config;
mod leads;
mod notifications;
mod properties;
mod security;
mod shared;

use crate::agencies::configure_directory_routes;
use crate::config::AppConfig;
use crate::leads::configure_lead_routes;
use crate::notifications::{
    configure_notification_routes, NotificationDispatcher, ReminderScheduler,
};
use crate::properties::configure_property_routes;
use crate::security::configure_security_routes;
use crate::security::middleware::actor_middleware;
use crate::security::permissions::PermissionRegistry;
use crate::shared::state::AppState;
use crate::shared::utils::create_conn;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();
    let conn = create_conn()?;

    let permissions = Arc::new(PermissionRegistry::new());
    let notifier = Arc::new(NotificationDispatcher::new());

    let state = Arc::new(AppState {
        conn,
        permissions: Arc::clone(&permissions),
        notifier: Arc::clone(&notifier),
    });

    match permissions.load(&state.conn).await {
        Ok(count) => info!("permission registry ready ({} overrides)", count),
        Err(e) => warn!("permission overrides not loaded yet: {}", e),
    }

    match ReminderScheduler::new(Arc::clone(&state), &config.reminder_cron) {
        Ok(scheduler) => scheduler.start(),
        Err(e) => warn!("invalid REMINDER_CRON, reminders disabled: {}", e),
    }

    let protected = Router::new()
        .merge(configure_security_routes())
        .merge(configure_property_routes())
        .merge(configure_lead_routes())
        .merge(configure_directory_routes())
        .merge(configure_notification_routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            actor_middleware,
        ));

    let app = Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_addr().parse()?;
    info!("estateserver listening on {}", addr);
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
