/// Entitlement Engine
///
/// Activation-code access grants for protected playlists and slideshows, and
/// subscription-tier quota enforcement for creator resources.

mod api;
mod auth;
mod codes;
mod config;
mod context;
mod db;
mod error;
mod ledger;
mod quota;
mod resources;
mod server;
mod users;

use config::ServerConfig;
use context::AppContext;
use error::EngineResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> EngineResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    let filter = config.logging.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::debug!(level = %config.logging.level, json = config.logging.json, "logging initialized");

    print_banner();

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    Entitlement Engine v{}
    activation codes / tier quotas
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
