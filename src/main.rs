//! llm-proxy — reverse proxy for LLM providers.
//!
//! Clients present a single virtual key and a single model alias; the
//! proxy authenticates the key, authorizes the alias, enforces per-(key,
//! alias) rate limits, rewrites the request for the chosen upstream
//! provider's wire format, injects real provider credentials, forwards the
//! call, and streams the response back.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod config;
mod crypto;
mod error;
mod pipeline;
mod providers;
mod ratelimit;
mod server;
mod store;

use config::Config;
use pipeline::AppState;
use ratelimit::RateLimiter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter.clone()))
        .init();

    let store: Arc<dyn store::Store> = Arc::from(
        store::open(config.db_type, &config.db_dsn, config.encryption_key.clone())
            .context("failed to open store")?,
    );

    if let Some(seed) = &config.master_seed {
        bootstrap::seed(store.as_ref(), seed)
            .await
            .context("failed to run bootstrap seed")?;
    }

    let state = Arc::new(AppState {
        store,
        limiter: RateLimiter::new(),
        http: reqwest::Client::new(),
    });

    let app = server::build(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(address = %addr, "llm-proxy listening");
    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
