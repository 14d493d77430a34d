use chrono::Duration;
use task_tracker::config::Config;
use task_tracker::feed::ChangeFeed;
use task_tracker::session::SessionIssuer;
use task_tracker::state::AppState;
use task_tracker::{db, routes};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,task_tracker=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let db = db::connect(&config.database_url).await?;
    tracing::info!(database_url = %config.database_url, "database ready");

    let sessions = SessionIssuer::new(&config.jwt_secret, Duration::hours(config.token_ttl_hours));
    let state = AppState::new(db, sessions, ChangeFeed::new(config.feed_capacity));

    let app = routes(state);

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    tracing::info!("server is listening at http://{}", config.addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
    }
}
