use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub(crate) fn build_filter(directive: Option<&str>) -> Result<EnvFilter> {
    match directive {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter \"{}\"", directive)),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Installs the stderr subscriber. A subscriber that is already installed
/// is kept.
pub(crate) fn init_logging(directive: Option<&str>) -> Result<()> {
    let filter = build_filter(directive)?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    match installed {
        Ok(()) => Ok(()),
        // another thread installed one first
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(error) => Err(anyhow!(error)).context("cannot install log subscriber"),
    }
}
