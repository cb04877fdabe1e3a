use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV_VAR: &str = "CMSEDIT_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber. The filter comes from `CMSEDIT_LOG`
/// (e.g. `CMSEDIT_LOG=cmsedit_core=debug`), defaulting to `warn`.
pub fn init() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init()
        .context("failed to initialize tracing subscriber")
}
