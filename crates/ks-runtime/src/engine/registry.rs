use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ks_core::{BridgeError, CommandFlags, CommandSpec, HostContext, KeySpec};
use rhai::{Dynamic, FnPtr, ImmutableString, INT};
use tracing::debug;

pub(crate) fn registration_error(message: impl Into<String>) -> BridgeError {
    BridgeError::new("REGISTRATION_FAILED", message)
}

/// Commands registered from script code, plus the startup window that gates
/// new registrations.
pub(crate) struct CommandRegistry {
    window_open: AtomicBool,
    commands: Mutex<BTreeMap<String, CommandSpec>>,
    /// Function names in the persistent library, the only ones dispatch can reach.
    handlers: Mutex<BTreeSet<String>>,
}

impl CommandRegistry {
    pub(crate) fn new() -> Self {
        Self {
            window_open: AtomicBool::new(true),
            commands: Mutex::new(BTreeMap::new()),
            handlers: Mutex::new(BTreeSet::new()),
        }
    }

    pub(crate) fn record_handlers<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        handlers.extend(names.into_iter().map(str::to_string));
    }

    fn has_handler(&self, name: &str) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub(crate) fn window_open(&self) -> bool {
        self.window_open.load(Ordering::Acquire)
    }

    pub(crate) fn close_window(&self) {
        self.window_open.store(false, Ordering::Release);
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.commands().contains_key(name)
    }

    pub(crate) fn list(&self) -> Vec<CommandSpec> {
        self.commands().values().cloned().collect()
    }

    /// Validates `register(fn, flags?, first?, last?, step?)` arguments and
    /// creates the host command. Returns the command name.
    pub(crate) fn register_from_args(
        &self,
        args: &[&mut Dynamic],
        host: Option<&dyn HostContext>,
    ) -> Result<String, BridgeError> {
        if !self.window_open() {
            return Err(registration_error(
                "register() is only allowed while startup scripts are loading.",
            ));
        }
        let spec = parse_registration(args)?;
        self.register(spec, host)
    }

    fn register(
        &self,
        spec: CommandSpec,
        host: Option<&dyn HostContext>,
    ) -> Result<String, BridgeError> {
        if self.contains(&spec.name) {
            return Err(registration_error(format!(
                "Command \"{}\" is already registered.",
                spec.name
            )));
        }
        if !self.has_handler(&spec.name) {
            return Err(registration_error(format!(
                "Function \"{}\" is not defined by a startup unit; functions local to a required module cannot back a command.",
                spec.name
            )));
        }
        let Some(host) = host else {
            return Err(registration_error(
                "register() needs a host context to create the command.",
            ));
        };
        host.create_command(&spec).map_err(|error| {
            registration_error(format!(
                "Host rejected command \"{}\": {}",
                spec.name, error.message
            ))
        })?;

        debug!(command = %spec.name, flags = %spec.flags, "registered script command");
        let name = spec.name.clone();
        self.commands().insert(name.clone(), spec);
        Ok(name)
    }

    fn commands(&self) -> MutexGuard<'_, BTreeMap<String, CommandSpec>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn parse_registration(args: &[&mut Dynamic]) -> Result<CommandSpec, BridgeError> {
    let Some(target) = args.first() else {
        return Err(registration_error("register() expects a function pointer."));
    };
    if !target.is::<FnPtr>() {
        return Err(registration_error(format!(
            "register() expects a function pointer, got {}.",
            target.type_name()
        )));
    }
    let fn_ptr = (**target).clone().cast::<FnPtr>();
    if fn_ptr.is_anonymous() {
        return Err(registration_error(
            "Anonymous functions cannot be registered; use Fn(\"name\").",
        ));
    }

    let flags = match args.get(1) {
        None => CommandFlags::default(),
        Some(value) if value.is::<ImmutableString>() => {
            CommandFlags::parse((**value).clone().cast::<ImmutableString>().as_str())
        }
        Some(value) => {
            return Err(registration_error(format!(
                "register() flags must be a string, got {}.",
                value.type_name()
            )));
        }
    };

    let keys = match args.len() {
        0..=2 => KeySpec::default(),
        5 => KeySpec {
            first: key_index(&*args[2], "first")?,
            last: key_index(&*args[3], "last")?,
            step: key_index(&*args[4], "step")?,
        },
        count => {
            return Err(registration_error(format!(
                "register() key range needs first, last and step together ({} of 3 given).",
                count.saturating_sub(2)
            )));
        }
    };

    Ok(CommandSpec {
        name: fn_ptr.fn_name().to_string(),
        flags,
        keys,
    })
}

fn key_index(value: &Dynamic, label: &str) -> Result<i64, BridgeError> {
    if !value.is::<INT>() {
        return Err(registration_error(format!(
            "register() key {} must be an integer, got {}.",
            label,
            value.type_name()
        )));
    }
    Ok(value.clone().cast::<INT>() as i64)
}
