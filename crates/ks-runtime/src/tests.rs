use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use ks_core::{BridgeError, CallReply, CommandSpec, HostContext, LogLevel, Reply, ScriptValue};

use super::*;

#[derive(Default)]
struct TestHost {
    id: String,
    store: Mutex<BTreeMap<String, String>>,
    created: Mutex<Vec<CommandSpec>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl TestHost {
    fn named(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            ..Self::default()
        })
    }

    fn logs(&self) -> Vec<(LogLevel, String)> {
        self.logs.lock().expect("logs lock").clone()
    }
}

impl HostContext for TestHost {
    fn call(&self, command: &str, args: &[String]) -> Option<CallReply> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((command.to_string(), args.to_vec()));
        match (command, args) {
            ("whoami", []) => Some(CallReply::String(self.id.clone())),
            ("get", [key]) => self
                .store
                .lock()
                .expect("store lock")
                .get(key)
                .cloned()
                .map(CallReply::String),
            ("set", [key, value]) => {
                self.store
                    .lock()
                    .expect("store lock")
                    .insert(key.clone(), value.clone());
                Some(CallReply::Other { raw: "+OK".into() })
            }
            ("echo", args) => Some(CallReply::Array(
                args.iter().cloned().map(CallReply::String).collect(),
            )),
            ("nested", []) => Some(CallReply::Array(vec![
                CallReply::Integer(1),
                CallReply::Array(vec![CallReply::String("x".into()), CallReply::Integer(2)]),
            ])),
            ("wide", []) => Some(CallReply::Integer(1i64 << 40)),
            _ => None,
        }
    }

    fn create_command(&self, spec: &CommandSpec) -> Result<(), BridgeError> {
        if spec.name.is_empty() {
            return Err(BridgeError::new("HOST_REJECTED", "empty command name"));
        }
        self.created.lock().expect("created lock").push(spec.clone());
        Ok(())
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logs
            .lock()
            .expect("logs lock")
            .push((level, message.to_string()));
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("keyscript-runtime-{}-{}", name, nanos));
    fs::create_dir_all(&dir).expect("temp dir should be created");
    dir
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent should be created");
    }
    fs::write(path, content).expect("file should be written");
}

fn host_dyn(host: &Arc<TestHost>) -> Arc<dyn HostContext> {
    Arc::clone(host) as Arc<dyn HostContext>
}

fn start_plain(host: &Arc<TestHost>) -> ScriptEnvironment {
    ScriptEnvironment::start(EnvironmentOptions::default(), host_dyn(host))
        .expect("environment should start")
}

fn start_with_scripts(host: &Arc<TestHost>, scripts: Vec<PathBuf>) -> ScriptEnvironment {
    ScriptEnvironment::start(
        EnvironmentOptions {
            startup_scripts: scripts,
            ..EnvironmentOptions::default()
        },
        host_dyn(host),
    )
    .expect("environment should start")
}

fn start_with_script(host: &Arc<TestHost>, name: &str, source: &str) -> ScriptEnvironment {
    let dir = temp_dir(name);
    let path = dir.join("startup.rhai");
    write_file(&path, source);
    start_with_scripts(host, vec![path])
}

#[test]
fn arithmetic_evaluates_to_an_integer_reply() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    assert_eq!(environment.evaluate(host_dyn(&host), "1+2"), Reply::Integer(3));
}

#[test]
fn nested_array_literals_become_array_replies() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    assert_eq!(
        environment.evaluate(host_dyn(&host), r#"[1, 'a', [2, 3]]"#),
        Reply::Array(vec![
            Reply::Integer(1),
            Reply::String("a".into()),
            Reply::Array(vec![Reply::Integer(2), Reply::Integer(3)]),
        ])
    );
}

#[test]
fn unsupported_results_degrade_to_null_and_doubles_stay_doubles() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    assert_eq!(environment.evaluate(host_dyn(&host), "true"), Reply::Null);
    assert_eq!(environment.evaluate(host_dyn(&host), "#{a: 1}"), Reply::Null);
    assert_eq!(environment.evaluate(host_dyn(&host), "()"), Reply::Null);
    assert_eq!(environment.evaluate(host_dyn(&host), "1.5"), Reply::Double(1.5));
    assert_eq!(
        environment.evaluate(host_dyn(&host), "4294967296"),
        Reply::Double(4294967296.0)
    );
    assert_eq!(
        environment.evaluate(host_dyn(&host), "[true, \"kept\"]"),
        Reply::Array(vec![Reply::Null, Reply::String("kept".into())])
    );
}

#[test]
fn host_call_returns_converted_replies() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    assert_eq!(
        environment.evaluate(host_dyn(&host), r#"host_call("nested")"#),
        Reply::Array(vec![
            Reply::Integer(1),
            Reply::Array(vec![Reply::String("x".into()), Reply::Integer(2)]),
        ])
    );
    assert_eq!(
        environment.evaluate(host_dyn(&host), r#"host_call("set", "k", "v")"#),
        Reply::String("+OK".into())
    );
    assert_eq!(
        environment.evaluate(host_dyn(&host), r#"host_call("get", "k")"#),
        Reply::String("v".into())
    );
    assert_eq!(
        environment.evaluate(host_dyn(&host), r#"host_call("wide") + 1"#),
        Reply::Double(((1i64 << 40) + 1) as f64)
    );
}

#[test]
fn host_call_arguments_are_stringified() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    let reply = environment.evaluate(host_dyn(&host), r#"host_call("echo", 5, "s", [1, 2])"#);
    assert_eq!(
        reply,
        Reply::Array(vec![
            Reply::String("5".into()),
            Reply::String("s".into()),
            Reply::String("[1, 2]".into()),
        ])
    );
}

#[test]
fn missing_host_result_raises_invalid_command() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);

    let reply = environment.evaluate(host_dyn(&host), r#"host_call("get", "missing-key")"#);
    let Reply::Error(message) = reply else {
        panic!("expected an error reply, got {:?}", reply);
    };
    assert!(message.contains("Invalid Command"));

    let caught = environment.evaluate(
        host_dyn(&host),
        r#"let caught = (); try { host_call("get", "missing-key") } catch (err) { caught = err; } caught"#,
    );
    assert_eq!(caught, Reply::String("Invalid Command".into()));
}

#[test]
fn registered_function_is_dispatched_by_name() {
    let host = TestHost::named("a");
    let environment = start_with_script(
        &host,
        "dispatch",
        r#"
fn foo() { 42 }
fn greet(name) { "hello " + name }
register(Fn("foo"));
register(Fn("greet"), "readonly fast");
"#,
    );

    assert!(!environment.startup_window_open());
    assert!(environment.is_registered("foo"));
    assert_eq!(environment.dispatch(host_dyn(&host), "foo", &[]), Reply::Integer(42));
    assert_eq!(
        environment.dispatch(host_dyn(&host), "greet", &["bob".to_string()]),
        Reply::String("hello bob".into())
    );

    let created = host.created.lock().expect("created lock");
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].name, "foo");
    assert_eq!(created[0].flags.to_string(), "write deny-oom random");
    assert_eq!(created[1].flags.to_string(), "readonly fast");
}

#[test]
fn register_fails_once_startup_has_completed() {
    let host = TestHost::named("a");
    let environment = start_with_script(&host, "window", "fn early() { 1 } register(Fn(\"early\"));");

    let reply = environment.evaluate(host_dyn(&host), "fn late() { 2 } register(Fn(\"late\"))");
    let Reply::Error(message) = reply else {
        panic!("late registration should fail, got {:?}", reply);
    };
    assert!(message.contains("only allowed while startup"));
    assert!(environment.is_registered("early"));
    assert!(!environment.is_registered("late"));
}

#[test]
fn partial_key_range_aborts_startup_before_reaching_the_host() {
    let host = TestHost::named("a");
    let dir = temp_dir("partial-keys");
    let path = dir.join("startup.rhai");
    write_file(&path, "fn foo() { 1 } register(Fn(\"foo\"), \"write\", 1, 1);");

    let error = ScriptEnvironment::start(
        EnvironmentOptions {
            startup_scripts: vec![path],
            ..EnvironmentOptions::default()
        },
        host_dyn(&host),
    )
    .err()
    .expect("partial key range should be fatal at startup");
    assert_eq!(error.code, "STARTUP_FAILED");
    assert!(error.message.contains("2 of 3"));
    assert!(host.created.lock().expect("created lock").is_empty());
}

#[test]
fn anonymous_functions_cannot_be_registered() {
    let host = TestHost::named("a");
    let environment = start_with_script(
        &host,
        "anonymous",
        r#"
let outcome = "";
try { register(|| 42); } catch (err) { outcome = err; }
"#,
    );
    let Reply::String(outcome) = environment.evaluate(host_dyn(&host), "outcome") else {
        panic!("registration error should be caught as a string");
    };
    assert!(outcome.contains("Anonymous functions cannot be registered"));
    assert!(host.created.lock().expect("created lock").is_empty());
}

#[test]
fn dispatch_resolves_the_handler_at_call_time() {
    let host = TestHost::named("a");
    let environment = start_with_script(&host, "late-binding", "fn foo() { 1 } register(Fn(\"foo\"));");

    assert_eq!(environment.dispatch(host_dyn(&host), "foo", &[]), Reply::Integer(1));
    assert_eq!(environment.evaluate(host_dyn(&host), "fn foo() { 2 }"), Reply::Null);
    assert_eq!(environment.dispatch(host_dyn(&host), "foo", &[]), Reply::Integer(2));
}

#[test]
fn dispatch_failures_become_error_replies() {
    let host = TestHost::named("a");
    let environment = start_with_script(
        &host,
        "dispatch-errors",
        r#"
fn boom() { throw "handler exploded"; }
fn deep() { throw "deep"; }
fn relay() { deep() }
fn one(a) { a }
register(Fn("boom"));
register(Fn("relay"));
register(Fn("one"));
"#,
    );

    let Reply::Error(message) = environment.dispatch(host_dyn(&host), "boom", &[]) else {
        panic!("throwing handler should produce an error reply");
    };
    assert!(message.contains("handler exploded"));
    assert!(message.ends_with("\n    at boom"));

    let Reply::Error(message) = environment.dispatch(host_dyn(&host), "relay", &[]) else {
        panic!("nested throw should produce an error reply");
    };
    let lines = message.lines().collect::<Vec<_>>();
    assert!(lines[0].contains("deep"));
    assert!(lines[1].starts_with("    at deep"));
    assert_eq!(lines[2], "    at relay");

    let Reply::Error(message) =
        environment.dispatch(host_dyn(&host), "one", &["a".into(), "b".into()])
    else {
        panic!("wrong argument count should produce an error reply");
    };
    assert_eq!(
        message,
        "Command \"one\" was called with 2 argument(s) but its function takes 1."
    );
    let error = environment
        .try_dispatch(host_dyn(&host), "boom", &["extra".into()])
        .expect_err("boom takes no arguments");
    assert_eq!(error.code, "DISPATCH_FAILED");
    assert!(error.message.contains("with 1 argument(s)"));
    assert!(environment.dispatch(host_dyn(&host), "nope", &[]).is_error());

    let error = environment
        .try_dispatch(host_dyn(&host), "nope", &[])
        .expect_err("unregistered name");
    assert_eq!(error.code, "DISPATCH_FAILED");

    assert_eq!(environment.evaluate(host_dyn(&host), "40 + 2"), Reply::Integer(42));
}

#[test]
fn compile_and_runtime_errors_keep_the_environment_usable() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);

    let compile = environment
        .try_evaluate(host_dyn(&host), "let = ;")
        .expect_err("syntax error");
    assert_eq!(compile.code, "COMPILE_ERROR");
    assert!(compile.message.starts_with("Syntax error"));

    let runtime = environment
        .try_evaluate(
            host_dyn(&host),
            "fn inner() { throw \"deep\"; } fn outer() { inner() } outer()",
        )
        .expect_err("thrown exception");
    assert_eq!(runtime.code, "RUNTIME_EXCEPTION");
    assert!(runtime.message.contains("deep"));
    assert!(runtime.message.contains("at inner"));
    assert!(runtime.message.contains("at outer"));

    assert_eq!(environment.evaluate(host_dyn(&host), "1+1"), Reply::Integer(2));
}

#[test]
fn scope_bindings_persist_between_invocations() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    assert_eq!(environment.evaluate(host_dyn(&host), "let counter = 1;"), Reply::Null);
    assert_eq!(
        environment.evaluate(host_dyn(&host), "counter += 1; counter"),
        Reply::Integer(2)
    );
    assert_eq!(
        environment.try_evaluate(host_dyn(&host), "KEYSCRIPT_VERSION"),
        Ok(ScriptValue::String(env!("CARGO_PKG_VERSION").to_string()))
    );
}

#[test]
fn functions_defined_earlier_remain_callable() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    environment.evaluate(host_dyn(&host), "fn double(x) { x * 2 }");
    assert_eq!(environment.evaluate(host_dyn(&host), "double(21)"), Reply::Integer(42));
}

#[test]
fn log_goes_to_the_ambient_host() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    environment.evaluate(host_dyn(&host), r#"log("plain")"#);
    environment.evaluate(host_dyn(&host), r#"log("warning", "careful")"#);
    environment.evaluate(host_dyn(&host), r#"log_debug("from bootstrap")"#);
    environment.evaluate(host_dyn(&host), r#"log("a", "b", "c")"#);
    environment.evaluate(host_dyn(&host), r#"log("loud", "x")"#);

    let logs = host.logs();
    assert_eq!(logs[0], (LogLevel::Notice, "plain".to_string()));
    assert_eq!(logs[1], (LogLevel::Warning, "careful".to_string()));
    assert_eq!(logs[2], (LogLevel::Debug, "from bootstrap".to_string()));
    assert_eq!(
        logs[3],
        (LogLevel::Warning, "log() called with invalid arguments".to_string())
    );
    assert_eq!(logs[4].0, LogLevel::Warning);
    assert!(logs[4].1.contains("loud"));
}

#[test]
fn require_resolves_relative_to_the_loading_file() {
    let host = TestHost::named("a");
    let dir = temp_dir("require-chain");
    write_file(&dir.join("lib/a.rhai"), "exports.c = require(\"./c.rhai\");\nexports.name = \"a\";");
    write_file(&dir.join("lib/c.rhai"), "exports.name = \"c\";");
    write_file(&dir.join("c.rhai"), "exports.name = \"wrong c\";");
    write_file(
        &dir.join("b.rhai"),
        "let a = require(\"./lib/a.rhai\");\nlet loaded = [a.name, a.c.name];",
    );

    let environment = start_with_scripts(&host, vec![dir.join("b.rhai")]);
    assert_eq!(
        environment.evaluate(host_dyn(&host), "loaded"),
        Reply::Array(vec![Reply::String("a".into()), Reply::String("c".into())])
    );
}

#[test]
fn require_without_extension_finds_the_script_file() {
    let host = TestHost::named("a");
    let dir = temp_dir("require-extension");
    write_file(&dir.join("util.rhai"), "exports.answer = 42;");
    let source = format!("require(\"{}\").answer", dir.join("util").display());
    let environment = start_plain(&host);
    assert_eq!(environment.evaluate(host_dyn(&host), &source), Reply::Integer(42));
}

#[test]
fn requires_return_independent_exports() {
    let host = TestHost::named("a");
    let dir = temp_dir("require-fresh");
    let module = dir.join("m.rhai");
    write_file(&module, "exports.items = [];");
    let source = format!(
        r#"
let first = require("{path}");
first.items.push(1);
let second = require("{path}");
[first.items.len(), second.items.len()]
"#,
        path = module.display()
    );
    let environment = start_plain(&host);
    assert_eq!(
        environment.evaluate(host_dyn(&host), &source),
        Reply::Array(vec![Reply::Integer(1), Reply::Integer(0)])
    );
}

#[test]
fn module_may_replace_its_exports_binding() {
    let host = TestHost::named("a");
    let dir = temp_dir("require-replace");
    let module = dir.join("m.rhai");
    write_file(&module, "exports = [\"replaced\"];");
    let source = format!("require(\"{}\")", module.display());
    let environment = start_plain(&host);
    assert_eq!(
        environment.evaluate(host_dyn(&host), &source),
        Reply::Array(vec![Reply::String("replaced".into())])
    );
}

#[test]
fn missing_modules_are_catchable_script_errors() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);

    let reply = environment.evaluate(host_dyn(&host), r#"require("/no/such/module.rhai")"#);
    let Reply::Error(message) = reply else {
        panic!("missing module should be an error, got {:?}", reply);
    };
    assert!(message.contains("/no/such/module.rhai"));

    let recovered = environment.evaluate(
        host_dyn(&host),
        r#"let outcome = "loaded"; try { require("/no/such/module.rhai"); } catch { outcome = "recovered"; } outcome"#,
    );
    assert_eq!(recovered, Reply::String("recovered".into()));
}

#[test]
fn module_local_functions_cannot_back_a_command() {
    let host = TestHost::named("a");
    let dir = temp_dir("module-register");
    write_file(
        &dir.join("cmds.rhai"),
        r#"
fn modcmd() { 1 }
let outcome = "registered";
try { register(Fn("modcmd")); } catch (err) { outcome = err; }
exports.outcome = outcome;
"#,
    );
    write_file(
        &dir.join("startup.rhai"),
        "const MODULE_OUTCOME = require(\"./cmds.rhai\").outcome;",
    );
    let environment = start_with_scripts(&host, vec![dir.join("startup.rhai")]);

    let Reply::String(outcome) = environment.evaluate(host_dyn(&host), "MODULE_OUTCOME") else {
        panic!("registration outcome should be a string");
    };
    assert!(outcome.contains("modcmd"));
    assert!(outcome.contains("required module"));
    assert!(!environment.is_registered("modcmd"));
    assert!(host.created.lock().expect("created lock").is_empty());
}

#[test]
fn module_errors_name_the_module_and_static_imports_are_refused() {
    let host = TestHost::named("a");
    let dir = temp_dir("require-errors");
    let failing = dir.join("failing.rhai");
    write_file(&failing, "throw \"module broke\";");
    let importing = dir.join("importing.rhai");
    write_file(&importing, "import \"other\" as other;\nexports.x = 1;");

    let environment = start_plain(&host);
    let error = environment
        .try_evaluate(host_dyn(&host), &format!("require(\"{}\")", failing.display()))
        .expect_err("module exception");
    assert!(error.message.contains("module broke"));
    assert!(error.message.contains(&format!("in module {}", failing.display())));

    let refused = environment
        .try_evaluate(host_dyn(&host), &format!("require(\"{}\")", importing.display()))
        .expect_err("static import");
    assert!(refused.message.contains("in module"));
}

#[test]
fn startup_failures_are_fatal() {
    let host = TestHost::named("a");
    let missing = ScriptEnvironment::start(
        EnvironmentOptions {
            startup_scripts: vec![PathBuf::from("/no/such/startup.rhai")],
            ..EnvironmentOptions::default()
        },
        host_dyn(&host),
    )
    .err()
    .expect("missing startup script");
    assert_eq!(missing.code, "STARTUP_FAILED");
    assert!(missing.message.contains("/no/such/startup.rhai"));

    let dir = temp_dir("startup-throw");
    let first = dir.join("first.rhai");
    let second = dir.join("second.rhai");
    write_file(&first, "fn ok() { 1 } register(Fn(\"ok\"));");
    write_file(&second, "throw \"startup broke\";");
    let thrown = ScriptEnvironment::start(
        EnvironmentOptions {
            startup_scripts: vec![first, second],
            ..EnvironmentOptions::default()
        },
        host_dyn(&host),
    )
    .err()
    .expect("throwing startup script");
    assert!(thrown.message.contains("startup broke"));
    assert!(thrown.message.contains("second.rhai"));
}

#[test]
fn bootstrap_override_replaces_the_embedded_unit() {
    let host = TestHost::named("a");
    let dir = temp_dir("bootstrap");
    let bootstrap = dir.join("bootstrap.rhai");
    write_file(&bootstrap, "const FROM_BOOTSTRAP = \"custom\";");
    let environment = ScriptEnvironment::start(
        EnvironmentOptions {
            bootstrap_path: Some(bootstrap),
            ..EnvironmentOptions::default()
        },
        host_dyn(&host),
    )
    .expect("custom bootstrap");
    assert_eq!(
        environment.evaluate(host_dyn(&host), "FROM_BOOTSTRAP"),
        Reply::String("custom".into())
    );
    assert!(environment.evaluate(host_dyn(&host), "KEYSCRIPT_VERSION").is_error());
}

#[test]
fn operation_budget_stops_runaway_scripts() {
    let host = TestHost::named("a");
    let environment = ScriptEnvironment::start(
        EnvironmentOptions {
            max_operations: Some(10_000),
            ..EnvironmentOptions::default()
        },
        host_dyn(&host),
    )
    .expect("environment");
    let error = environment
        .try_evaluate(host_dyn(&host), "loop { }")
        .expect_err("budget exceeded");
    assert_eq!(error.code, "RUNTIME_EXCEPTION");
    assert_eq!(environment.evaluate(host_dyn(&host), "7"), Reply::Integer(7));
}

/// Host whose `call` re-enters the environment, the way a host does when a
/// script calls a command that was registered by a script.
struct ReentrantHost {
    environment: Mutex<Option<Arc<ScriptEnvironment>>>,
    inner_reply: Mutex<Option<Reply>>,
}

impl HostContext for ReentrantHost {
    fn call(&self, command: &str, args: &[String]) -> Option<CallReply> {
        let environment = self.environment.lock().expect("env lock").clone()?;
        let reply = environment.dispatch(Arc::new(TestHost::default()), command, args);
        *self.inner_reply.lock().expect("reply lock") = Some(reply);
        None
    }

    fn create_command(&self, _spec: &CommandSpec) -> Result<(), BridgeError> {
        Ok(())
    }

    fn log(&self, _level: LogLevel, _message: &str) {}
}

#[test]
fn reentrant_dispatch_is_rejected_instead_of_deadlocking() {
    let host = Arc::new(ReentrantHost {
        environment: Mutex::new(None),
        inner_reply: Mutex::new(None),
    });
    let dir = temp_dir("reentrant");
    let path = dir.join("startup.rhai");
    write_file(&path, "fn inner() { 1 } register(Fn(\"inner\"));");
    let environment = Arc::new(
        ScriptEnvironment::start(
            EnvironmentOptions {
                startup_scripts: vec![path],
                ..EnvironmentOptions::default()
            },
            Arc::clone(&host) as Arc<dyn HostContext>,
        )
        .expect("environment"),
    );
    *host.environment.lock().expect("env lock") = Some(Arc::clone(&environment));

    let outer = environment.evaluate(
        Arc::clone(&host) as Arc<dyn HostContext>,
        r#"host_call("inner")"#,
    );
    assert!(outer.is_error());
    let inner = host.inner_reply.lock().expect("reply lock").clone();
    let Some(Reply::Error(message)) = inner else {
        panic!("inner dispatch should be rejected, got {:?}", inner);
    };
    assert!(message.contains("already running"));

    // environment is untouched by the rejected nested call
    assert_eq!(
        environment.dispatch(Arc::new(TestHost::default()), "inner", &[]),
        Reply::Integer(1)
    );
}

#[test]
fn concurrent_invocations_are_serialized_with_their_own_host() {
    let setup = TestHost::named("setup");
    let environment = Arc::new(start_plain(&setup));
    environment.evaluate(host_dyn(&setup), "let counter = 0;");

    let handles = (0..8)
        .map(|index| {
            let environment = Arc::clone(&environment);
            std::thread::spawn(move || {
                let host = TestHost::named(&format!("worker-{}", index));
                let mut seen = Vec::new();
                for _ in 0..25 {
                    let reply = environment.evaluate(
                        host_dyn(&host),
                        r#"counter += 1; let me = host_call("whoami"); [me, host_call("whoami"), counter]"#,
                    );
                    seen.push(reply);
                }
                (format!("worker-{}", index), seen)
            })
        })
        .collect::<Vec<_>>();

    let mut counters = Vec::new();
    for handle in handles {
        let (id, replies) = handle.join().expect("worker thread");
        for reply in replies {
            let Reply::Array(items) = reply else {
                panic!("unexpected reply {:?}", reply);
            };
            assert_eq!(items[0], Reply::String(id.clone()));
            assert_eq!(items[1], Reply::String(id.clone()));
            let Reply::Integer(counter) = items[2] else {
                panic!("counter should be an integer");
            };
            counters.push(counter);
        }
    }

    counters.sort_unstable();
    assert_eq!(counters, (1..=200).collect::<Vec<_>>());
    assert_eq!(environment.evaluate(host_dyn(&setup), "counter"), Reply::Integer(200));
}

#[test]
fn unknown_commands_reach_the_host_before_failing() {
    let host = TestHost::named("a");
    let environment = start_plain(&host);
    assert!(environment
        .try_evaluate(host_dyn(&host), "host_call(\"unknown-command\")")
        .is_err());
    assert_eq!(
        host.calls.lock().expect("calls lock").last().map(|call| call.0.clone()),
        Some("unknown-command".to_string())
    );
}

#[test]
fn install_keeps_a_single_process_environment() {
    let host = TestHost::named("global");
    let installed =
        install(EnvironmentOptions::default(), host_dyn(&host)).expect("first install");
    assert!(std::ptr::eq(
        installed,
        environment().expect("installed environment")
    ));

    let error = install(EnvironmentOptions::default(), host_dyn(&host))
        .err()
        .expect("second install");
    assert_eq!(error.code, "ENVIRONMENT_INSTALLED");
    assert_eq!(installed.evaluate(host_dyn(&host), "1+2"), Reply::Integer(3));
}
