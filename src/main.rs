use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cardgate::config::Config;
use cardgate::db::{AppState, create_pool, init_db};
use cardgate::handlers;
use cardgate::rate_limit::SlidingWindowLimiter;

#[derive(Parser, Debug)]
#[command(name = "cardgate", version, about = "Card-key verification server")]
struct Args {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let pool = create_pool(&config.database_path, 16).context("failed to open database pool")?;
    {
        let conn = pool.get().context("failed to get database connection")?;
        init_db(&conn).context("failed to initialize schema")?;
    }

    let limiter = Arc::new(SlidingWindowLimiter::per_minute(config.rate_limit_per_minute));
    spawn_sweeper(limiter.clone(), Duration::from_secs(config.rate_limit_sweep_secs));

    let state = AppState {
        db: pool,
        limiter,
        dev_mode: config.dev_mode,
    };

    if config.dev_mode {
        tracing::warn!("Running in dev mode: /dev endpoints are enabled");
    }

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

/// Periodically drop identifiers that have gone quiet so the limiter map
/// does not grow without bound.
fn spawn_sweeper(limiter: Arc<SlidingWindowLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let purged = limiter.purge_idle();
            if purged > 0 {
                tracing::debug!("Purged {} idle rate-limit entries", purged);
            }
        }
    });
}
