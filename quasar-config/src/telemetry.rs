use anyhow::anyhow;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber: `RUST_LOG` when set, `default_filter`
/// otherwise, rendered by the fmt layer.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
