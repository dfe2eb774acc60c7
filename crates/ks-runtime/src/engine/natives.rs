use std::any::TypeId;
use std::sync::Arc;

use ks_core::{to_script_value, LogLevel};
use rhai::{Dynamic, Engine, EvalAltResult, NativeCallContext, Position};
use tracing::{debug, info, warn};

use super::ambient::current_host;
use super::registry::CommandRegistry;
use super::require::{require_module, ResolutionStack};
use crate::helpers::rhai_bridge::{dynamic_to_text, script_value_to_dynamic};

/// Script name of the host call native. Rhai reserves `call` for calling
/// function pointers.
pub const HOST_CALL_FN: &str = "host_call";
/// Arguments `host_call` accepts after the command name.
pub const MAX_HOST_CALL_ARGS: usize = 8;
pub(crate) const INVALID_COMMAND: &str = "Invalid Command";

/// State the native functions share with the environment that owns them.
pub(crate) struct NativeState {
    pub(crate) registry: CommandRegistry,
    pub(crate) resolution: ResolutionStack,
}

impl NativeState {
    pub(crate) fn new() -> Self {
        Self {
            registry: CommandRegistry::new(),
            resolution: ResolutionStack::new(),
        }
    }
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.into()),
        Position::NONE,
    ))
}

fn dynamic_params(count: usize) -> Vec<TypeId> {
    vec![TypeId::of::<Dynamic>(); count]
}

#[allow(deprecated)]
pub(crate) fn install_natives(engine: &mut Engine, state: &Arc<NativeState>) {
    for arity in 0..=3 {
        engine.register_raw_fn("log", dynamic_params(arity), |_context, args| {
            script_log(args);
            Ok(())
        });
    }

    for arity in 1..=MAX_HOST_CALL_ARGS + 1 {
        engine.register_raw_fn(HOST_CALL_FN, dynamic_params(arity), |_context, args| {
            host_call(args)
        });
    }

    for arity in 1..=5 {
        let state = Arc::clone(state);
        engine.register_raw_fn("register", dynamic_params(arity), move |_context, args| {
            let host = current_host();
            state
                .registry
                .register_from_args(args, host.as_deref())
                .map(Dynamic::from)
                .map_err(|error| runtime_error(error.message))
        });
    }

    let resolver_state = Arc::clone(state);
    engine.register_fn(
        "require",
        move |context: NativeCallContext, specifier: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            require_module(context.engine(), &resolver_state.resolution, specifier)
        },
    );

    engine.register_fn("version", || env!("CARGO_PKG_VERSION").to_string());
}

fn script_log(args: &[&mut Dynamic]) {
    match args {
        [message] => emit_log(LogLevel::Notice, &dynamic_to_text(message)),
        [level, message] => match dynamic_to_text(level).parse::<LogLevel>() {
            Ok(level) => emit_log(level, &dynamic_to_text(message)),
            Err(error) => emit_log(LogLevel::Warning, &format!("log() {}", error.message)),
        },
        _ => emit_log(LogLevel::Warning, "log() called with invalid arguments"),
    }
}

fn emit_log(level: LogLevel, message: &str) {
    if let Some(host) = current_host() {
        host.log(level, message);
        return;
    }
    match level {
        LogLevel::Debug | LogLevel::Verbose => debug!(target: "script", "{}", message),
        LogLevel::Notice => info!(target: "script", "{}", message),
        LogLevel::Warning => warn!(target: "script", "{}", message),
    }
}

fn host_call(args: &[&mut Dynamic]) -> Result<Dynamic, Box<EvalAltResult>> {
    let mut strings = args.iter().map(|arg| dynamic_to_text(arg));
    let Some(command) = strings.next() else {
        return Err(runtime_error(INVALID_COMMAND));
    };
    let command_args = strings.collect::<Vec<_>>();

    let Some(host) = current_host() else {
        return Err(runtime_error(INVALID_COMMAND));
    };
    debug!(command = %command, argc = command_args.len(), "script host call");
    match host.call(&command, &command_args) {
        Some(reply) => Ok(script_value_to_dynamic(&to_script_value(&reply))),
        None => Err(runtime_error(INVALID_COMMAND)),
    }
}
