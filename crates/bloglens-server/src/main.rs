mod api;
mod batch;
mod context;
mod handlers;
mod middleware;
mod scheduler;
#[cfg(test)]
mod test_support;
mod worker;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::api::{build_app, default_rate_limit_state, AppState};
use crate::context::ServiceContext;
use crate::middleware::AuthState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = bloglens_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_settings = bloglens_db::PoolSettings::from_app_config(&config);
    let pool = bloglens_db::connect_pool(&config.database_url, pool_settings).await?;
    bloglens_db::run_migrations(&pool).await?;
    tracing::info!("database schema is current");

    let ctx = Arc::new(ServiceContext::build(config.clone(), pool.clone())?);

    let _scheduler = scheduler::build_scheduler(Arc::clone(&ctx)).await?;

    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(Arc::clone(&ctx), shutdown.clone()));

    let auth = AuthState::new(&config.api_key);
    let state = AppState {
        pool,
        scraper: Arc::clone(&ctx.scraper),
    };
    let app = build_app(state, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, backend = %config.scraper_backend, "bloglens listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The HTTP server is down; stop claiming and drain in-flight tasks.
    shutdown.cancel();
    worker_handle.await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
