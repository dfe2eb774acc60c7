use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use ks_core::{BridgeError, CallReply, CommandSpec, HostContext, LogLevel, Reply};
use ks_runtime::ScriptEnvironment;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::command_line::EVALSCRIPT;

const BUILTIN_COMMANDS: &[&str] = &[
    "PING", "ECHO", "GET", "SET", "DEL", "EXISTS", "INCR", "KEYS", "RPUSH", "LRANGE", EVALSCRIPT,
];
const MAX_KEPT_LOGS: usize = 256;
const WRONG_TYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Text(String),
    List(Vec<String>),
}

fn host_rejected(message: impl Into<String>) -> BridgeError {
    BridgeError::new("HOST_REJECTED", message)
}

fn wrong_arity(command: &str) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_ascii_lowercase()
    ))
}

/// In-memory key/value command processor that scripts can call into and
/// extend with registered commands.
pub struct MemoryHost {
    this: Weak<MemoryHost>,
    store: Mutex<BTreeMap<String, Entry>>,
    /// Script commands keyed by upper-cased name.
    commands: Mutex<BTreeMap<String, CommandSpec>>,
    logs: Mutex<VecDeque<(LogLevel, String)>>,
    environment: OnceLock<Arc<ScriptEnvironment>>,
}

impl MemoryHost {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(BTreeMap::new()),
            logs: Mutex::new(VecDeque::new()),
            environment: OnceLock::new(),
        })
    }

    /// Attaches the script environment that serves `EVALSCRIPT` and the
    /// registered commands. Only the first attach takes effect.
    pub fn attach(&self, environment: Arc<ScriptEnvironment>) -> bool {
        self.environment.set(environment).is_ok()
    }

    pub fn context(&self) -> Option<Arc<dyn HostContext>> {
        self.this
            .upgrade()
            .map(|host| host as Arc<dyn HostContext>)
    }

    pub fn registered(&self) -> Vec<CommandSpec> {
        lock(&self.commands).values().cloned().collect()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        lock(&self.logs).iter().cloned().collect()
    }

    /// Runs one command. `args[0]` is the command name, matched without
    /// regard to case.
    pub fn execute(&self, args: &[String]) -> Reply {
        let Some((name, rest)) = args.split_first() else {
            return Reply::error("ERR empty command");
        };
        let command = name.to_ascii_uppercase();
        debug!(command = %command, argc = rest.len(), "host command");
        match command.as_str() {
            "PING" => match rest {
                [] => Reply::String("PONG".into()),
                [message] => Reply::String(message.clone()),
                _ => wrong_arity(&command),
            },
            "ECHO" => match rest {
                [message] => Reply::String(message.clone()),
                _ => wrong_arity(&command),
            },
            "GET" => match rest {
                [key] => self.get(key),
                _ => wrong_arity(&command),
            },
            "SET" => match rest {
                [key, value] => {
                    lock(&self.store).insert(key.clone(), Entry::Text(value.clone()));
                    Reply::String("OK".into())
                }
                _ => wrong_arity(&command),
            },
            "DEL" if !rest.is_empty() => {
                let mut store = lock(&self.store);
                let removed = rest.iter().filter(|key| store.remove(*key).is_some()).count();
                Reply::Integer(removed as i64)
            }
            "EXISTS" if !rest.is_empty() => {
                let store = lock(&self.store);
                let found = rest.iter().filter(|key| store.contains_key(*key)).count();
                Reply::Integer(found as i64)
            }
            "INCR" => match rest {
                [key] => self.incr(key),
                _ => wrong_arity(&command),
            },
            "KEYS" => match rest {
                [pattern] => self.keys(pattern),
                _ => wrong_arity(&command),
            },
            "RPUSH" if rest.len() >= 2 => self.rpush(&rest[0], &rest[1..]),
            "LRANGE" => match rest {
                [key, start, stop] => self.lrange(key, start, stop),
                _ => wrong_arity(&command),
            },
            EVALSCRIPT => match rest {
                [source] => self.evalscript(source),
                _ => wrong_arity(&command),
            },
            "DEL" | "EXISTS" | "RPUSH" => wrong_arity(&command),
            _ => self.dispatch_registered(&command, name, rest),
        }
    }

    fn get(&self, key: &str) -> Reply {
        match lock(&self.store).get(key) {
            Some(Entry::Text(value)) => Reply::String(value.clone()),
            Some(Entry::List(_)) => Reply::error(WRONG_TYPE),
            None => Reply::Null,
        }
    }

    fn incr(&self, key: &str) -> Reply {
        let mut store = lock(&self.store);
        let current = match store.get(key) {
            None => 0,
            Some(Entry::Text(value)) => match value.parse::<i64>() {
                Ok(value) => value,
                Err(_) => return Reply::error(NOT_AN_INTEGER),
            },
            Some(Entry::List(_)) => return Reply::error(WRONG_TYPE),
        };
        let Some(next) = current.checked_add(1) else {
            return Reply::error(NOT_AN_INTEGER);
        };
        store.insert(key.to_string(), Entry::Text(next.to_string()));
        Reply::Integer(next)
    }

    fn keys(&self, pattern: &str) -> Reply {
        let matcher = match glob_regex(pattern) {
            Ok(matcher) => matcher,
            Err(error) => return Reply::error(format!("ERR invalid pattern: {}", error)),
        };
        Reply::Array(
            lock(&self.store)
                .keys()
                .filter(|key| matcher.is_match(key))
                .map(|key| Reply::String(key.clone()))
                .collect(),
        )
    }

    fn rpush(&self, key: &str, values: &[String]) -> Reply {
        let mut store = lock(&self.store);
        let entry = store
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()));
        match entry {
            Entry::List(items) => {
                items.extend(values.iter().cloned());
                Reply::Integer(items.len() as i64)
            }
            Entry::Text(_) => Reply::error(WRONG_TYPE),
        }
    }

    fn lrange(&self, key: &str, start: &str, stop: &str) -> Reply {
        let (Ok(start), Ok(stop)) = (start.parse::<i64>(), stop.parse::<i64>()) else {
            return Reply::error(NOT_AN_INTEGER);
        };
        let store = lock(&self.store);
        let items = match store.get(key) {
            None => return Reply::Array(Vec::new()),
            Some(Entry::Text(_)) => return Reply::error(WRONG_TYPE),
            Some(Entry::List(items)) => items,
        };
        let len = items.len() as i64;
        let from = if start < 0 { (len + start).max(0) } else { start };
        let to = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if from > to || from >= len {
            return Reply::Array(Vec::new());
        }
        Reply::Array(
            items[from as usize..=to as usize]
                .iter()
                .cloned()
                .map(Reply::String)
                .collect(),
        )
    }

    fn evalscript(&self, source: &str) -> Reply {
        match (self.environment.get(), self.context()) {
            (Some(environment), Some(context)) => environment.evaluate(context, source),
            _ => Reply::error("ERR scripting is not available"),
        }
    }

    fn dispatch_registered(&self, command: &str, name: &str, args: &[String]) -> Reply {
        let spec = lock(&self.commands).get(command).cloned();
        let Some(spec) = spec else {
            return Reply::error(format!("ERR unknown command '{}'", name));
        };
        match (self.environment.get(), self.context()) {
            (Some(environment), Some(context)) => environment.dispatch(context, &spec.name, args),
            _ => Reply::error("ERR scripting is not available"),
        }
    }
}

impl HostContext for MemoryHost {
    fn call(&self, command: &str, args: &[String]) -> Option<CallReply> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(command.to_string());
        full.extend(args.iter().cloned());
        // A top-level nil is "no result".
        match self.execute(&full) {
            Reply::Null => None,
            reply => Some(to_call_reply(reply)),
        }
    }

    fn create_command(&self, spec: &CommandSpec) -> Result<(), BridgeError> {
        if spec.name.is_empty() || spec.name.chars().any(char::is_whitespace) {
            return Err(host_rejected(format!(
                "Invalid command name \"{}\".",
                spec.name
            )));
        }
        let unknown = spec.flags.unknown_words();
        if !unknown.is_empty() {
            return Err(host_rejected(format!(
                "Unknown command flags: {}.",
                unknown.join(", ")
            )));
        }
        let key = spec.name.to_ascii_uppercase();
        if BUILTIN_COMMANDS.contains(&key.as_str()) {
            return Err(host_rejected(format!(
                "Command \"{}\" collides with a built-in command.",
                spec.name
            )));
        }
        let mut commands = lock(&self.commands);
        if commands.contains_key(&key) {
            return Err(host_rejected(format!(
                "Command \"{}\" already exists.",
                spec.name
            )));
        }
        info!(command = %spec.name, flags = %spec.flags, "created script command");
        commands.insert(key, spec.clone());
        Ok(())
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug | LogLevel::Verbose => debug!(target: "script", "{}", message),
            LogLevel::Notice => info!(target: "script", "{}", message),
            LogLevel::Warning => warn!(target: "script", "{}", message),
        }
        let mut logs = lock(&self.logs);
        if logs.len() == MAX_KEPT_LOGS {
            logs.pop_front();
        }
        logs.push_back((level, message.to_string()));
    }
}

/// Host replies as seen by a script. Kinds a script cannot represent keep
/// their text form.
pub(crate) fn to_call_reply(reply: Reply) -> CallReply {
    match reply {
        Reply::String(value) => CallReply::String(value),
        Reply::Integer(value) => CallReply::Integer(value),
        Reply::Array(items) => CallReply::Array(items.into_iter().map(to_call_reply).collect()),
        Reply::Double(value) => CallReply::Other {
            raw: value.to_string(),
        },
        Reply::Null => CallReply::Other { raw: String::new() },
        Reply::Error(message) => CallReply::Other { raw: message },
    }
}

fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
