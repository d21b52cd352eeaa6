//! Waitlist server binary.
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/waitlist cargo run -p waitlist-server
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use waitlist_server::{Application, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waitlist=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        addr = %format!("{}:{}", config.server.host, config.server.port),
        admission_window_secs = config.engine.admission_window_secs,
        "Starting waitlist server"
    );

    Application::build(config).await?.run().await
}
