//! Tracing configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Configure stdout logging, as JSON lines when `json` is set.
pub fn configure_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,research_agent=debug".into()),
    );

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    Ok(())
}
