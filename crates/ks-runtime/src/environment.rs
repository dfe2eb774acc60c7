use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ks_core::{to_host_reply, BridgeError, CommandSpec, HostContext, Reply, ScriptValue};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope, AST};
use tracing::{debug, info, warn};

use crate::engine::{
    describe_eval_error, describe_parse_error, install_natives, thread_token, AmbientGuard,
    NativeState, OwnerGuard,
};
use crate::helpers::rhai_bridge::{dynamic_to_script_value, strings_to_dynamics};

pub const BOOTSTRAP_SOURCE: &str = include_str!("bootstrap.rhai");
const BOOTSTRAP_UNIT_NAME: &str = "bootstrap";
const EVAL_UNIT_NAME: &str = "eval";

#[derive(Debug, Clone, Default)]
pub struct EnvironmentOptions {
    /// Run in order after the bootstrap unit, while registration is open.
    pub startup_scripts: Vec<PathBuf>,
    /// Replaces the embedded bootstrap unit.
    pub bootstrap_path: Option<PathBuf>,
    /// Operation budget per invocation. `None` lets scripts run to completion.
    pub max_operations: Option<u64>,
}

struct EnvironmentState {
    engine: Engine,
    /// Script functions defined by every unit evaluated so far.
    library: AST,
    scope: Scope<'static>,
}

/// The long-lived scripting environment shared by every invocation.
///
/// All script execution happens under one lock. Registered commands and the
/// function library live for as long as the environment does.
pub struct ScriptEnvironment {
    state: Mutex<EnvironmentState>,
    natives: Arc<NativeState>,
    owner: AtomicU64,
}

impl ScriptEnvironment {
    /// Builds the environment, runs the bootstrap unit and the startup
    /// scripts, then closes the registration window. Any unit failing is
    /// fatal.
    pub fn start(
        options: EnvironmentOptions,
        host: Arc<dyn HostContext>,
    ) -> Result<Self, BridgeError> {
        let environment = Self::create(&options);

        let bootstrap = match &options.bootstrap_path {
            Some(path) => read_startup_file(path)?,
            None => BOOTSTRAP_SOURCE.to_string(),
        };
        environment.load_startup_unit(
            &host,
            BOOTSTRAP_UNIT_NAME,
            &bootstrap,
            options.bootstrap_path.as_deref(),
        )?;

        for path in &options.startup_scripts {
            let source = read_startup_file(path)?;
            environment.load_startup_unit(
                &host,
                &path.display().to_string(),
                &source,
                Some(path),
            )?;
        }

        environment.natives.registry.close_window();
        info!(
            startup_scripts = options.startup_scripts.len(),
            commands = environment.natives.registry.list().len(),
            "script environment ready, registration closed"
        );
        Ok(environment)
    }

    fn create(options: &EnvironmentOptions) -> Self {
        let natives = Arc::new(NativeState::new());
        let mut engine = Engine::new();
        engine.set_module_resolver(DummyModuleResolver::new());
        if let Some(limit) = options.max_operations {
            engine.set_max_operations(limit);
        }
        install_natives(&mut engine, &natives);

        Self {
            state: Mutex::new(EnvironmentState {
                engine,
                library: AST::empty(),
                scope: Scope::new(),
            }),
            natives,
            owner: AtomicU64::new(0),
        }
    }

    fn load_startup_unit(
        &self,
        host: &Arc<dyn HostContext>,
        name: &str,
        source: &str,
        path: Option<&Path>,
    ) -> Result<(), BridgeError> {
        info!(unit = %name, "loading startup unit");
        self.with_invocation(Arc::clone(host), |state| {
            let _entry = path.map(|path| self.natives.resolution.enter(path.to_path_buf()));
            run_unit(state, &self.natives, name, source)
        })
        .map(|_| ())
        .map_err(|error| {
            BridgeError::startup(format!(
                "Startup unit \"{}\" failed: {}",
                name, error.message
            ))
        })
    }

    pub fn startup_window_open(&self) -> bool {
        self.natives.registry.window_open()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.natives.registry.contains(name)
    }

    pub fn registered_commands(&self) -> Vec<CommandSpec> {
        self.natives.registry.list()
    }

    /// Compiles and runs `source` against the persistent scope.
    pub fn try_evaluate(
        &self,
        host: Arc<dyn HostContext>,
        source: &str,
    ) -> Result<ScriptValue, BridgeError> {
        debug!(bytes = source.len(), "evaluating script");
        self.with_invocation(host, |state| {
            run_unit(state, &self.natives, EVAL_UNIT_NAME, source)
        })
    }

    pub fn evaluate(&self, host: Arc<dyn HostContext>, source: &str) -> Reply {
        match self.try_evaluate(host, source) {
            Ok(value) => to_host_reply(&value),
            Err(error) => {
                warn!(code = %error.code, "script evaluation failed");
                Reply::Error(error.message)
            }
        }
    }

    /// Calls the script function behind a registered command. The function
    /// is looked up by name when the command runs, not when it was
    /// registered.
    pub fn try_dispatch(
        &self,
        host: Arc<dyn HostContext>,
        name: &str,
        args: &[String],
    ) -> Result<ScriptValue, BridgeError> {
        if !self.natives.registry.contains(name) {
            return Err(BridgeError::new(
                "DISPATCH_FAILED",
                format!("Command \"{}\" was not registered by a script.", name),
            ));
        }
        debug!(command = %name, argc = args.len(), "dispatching script command");
        self.with_invocation(host, |state| {
            let EnvironmentState {
                engine,
                library,
                scope,
            } = state;
            check_handler_arity(library, name, args.len())?;
            let result = engine
                .call_fn::<Dynamic>(scope, library, name, strings_to_dynamics(args))
                .map_err(|error| {
                    // call_fn reports the handler's own failure without a frame for it
                    let framed = EvalAltResult::ErrorInFunctionCall(
                        name.to_string(),
                        String::new(),
                        error,
                        Position::NONE,
                    );
                    BridgeError::new("DISPATCH_FAILED", describe_eval_error(&framed))
                })?;
            Ok(dynamic_to_script_value(result))
        })
    }

    pub fn dispatch(&self, host: Arc<dyn HostContext>, name: &str, args: &[String]) -> Reply {
        match self.try_dispatch(host, name, args) {
            Ok(value) => to_host_reply(&value),
            Err(error) => {
                warn!(command = %name, code = %error.code, "script command failed");
                Reply::Error(error.message)
            }
        }
    }

    /// Runs `run` holding the environment lock with `host` as the ambient
    /// host context. The binding is released before the lock.
    fn with_invocation<T>(
        &self,
        host: Arc<dyn HostContext>,
        run: impl FnOnce(&mut EnvironmentState) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let token = thread_token();
        if self.owner.load(Ordering::Acquire) == token {
            return Err(BridgeError::new(
                "REENTRANT_INVOCATION",
                "The script environment is already running on this thread.",
            ));
        }

        let mut state = self.lock_state();
        let _owner = OwnerGuard::claim(&self.owner, token);
        let _ambient = AmbientGuard::bind(host);
        run(&mut *state)
    }

    fn lock_state(&self) -> MutexGuard<'_, EnvironmentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_handler_arity(library: &AST, name: &str, argc: usize) -> Result<(), BridgeError> {
    let arities = library
        .iter_functions()
        .filter(|function| function.name == name)
        .map(|function| function.params.len())
        .collect::<Vec<_>>();
    if arities.is_empty() {
        return Err(BridgeError::new(
            "DISPATCH_FAILED",
            format!("Command \"{}\" has no script function behind it.", name),
        ));
    }
    if !arities.contains(&argc) {
        let expected = arities
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(BridgeError::new(
            "DISPATCH_FAILED",
            format!(
                "Command \"{}\" was called with {} argument(s) but its function takes {}.",
                name, argc, expected
            ),
        ));
    }
    Ok(())
}

fn run_unit(
    state: &mut EnvironmentState,
    natives: &NativeState,
    unit_name: &str,
    source: &str,
) -> Result<ScriptValue, BridgeError> {
    let EnvironmentState {
        engine,
        library,
        scope,
    } = state;

    let ast = engine
        .compile(source)
        .map_err(|error| BridgeError::compile(describe_parse_error(&error)))?;
    *library = library.merge(&ast.clone_functions_only());
    natives
        .registry
        .record_handlers(library.iter_functions().map(|function| function.name));

    let mut unit = library.merge(&ast);
    unit.set_source(unit_name);
    let result = engine
        .eval_ast_with_scope::<Dynamic>(scope, &unit)
        .map_err(|error| BridgeError::runtime(describe_eval_error(&error)))?;
    Ok(dynamic_to_script_value(result))
}

fn read_startup_file(path: &Path) -> Result<String, BridgeError> {
    fs::read_to_string(path).map_err(|error| {
        BridgeError::startup(format!(
            "Cannot read startup script {}: {}",
            path.display(),
            error
        ))
    })
}
