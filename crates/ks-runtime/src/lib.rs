use std::sync::{Arc, OnceLock};

use ks_core::{BridgeError, HostContext};

mod engine;
mod environment;
mod helpers;

pub use engine::{HOST_CALL_FN, MAX_HOST_CALL_ARGS};
pub use environment::{EnvironmentOptions, ScriptEnvironment, BOOTSTRAP_SOURCE};

static ENVIRONMENT: OnceLock<ScriptEnvironment> = OnceLock::new();

fn already_installed() -> BridgeError {
    BridgeError::new(
        "ENVIRONMENT_INSTALLED",
        "The process script environment is already installed.",
    )
}

/// Starts the process-wide environment. Fails if one is already installed.
pub fn install(
    options: EnvironmentOptions,
    host: Arc<dyn HostContext>,
) -> Result<&'static ScriptEnvironment, BridgeError> {
    if ENVIRONMENT.get().is_some() {
        return Err(already_installed());
    }
    let environment = ScriptEnvironment::start(options, host)?;
    if ENVIRONMENT.set(environment).is_err() {
        return Err(already_installed());
    }
    ENVIRONMENT.get().ok_or_else(already_installed)
}

pub fn environment() -> Option<&'static ScriptEnvironment> {
    ENVIRONMENT.get()
}

#[cfg(test)]
mod tests;
