use falcon_core::Config;
use falcon_server::{router, startup};
use tracing::{info, warn};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    falcon_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,falcon_server=debug")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let config = Config::from_env();
    config.log_summary();

    let (state, reaper) = startup::build_app_state(&config)?;
    let reaper_task = reaper.spawn();

    let app = router::build_router(state.clone())
        .layer(router::cors_layer(&config.server.cors_origin))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Falcon Parse backend listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper_task.abort();
    state.renderer.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
