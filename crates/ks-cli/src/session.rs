use std::io::{BufRead, Write};
use std::sync::Arc;

use ks_core::{BridgeError, Reply};
use ks_runtime::{EnvironmentOptions, ScriptEnvironment};
use tracing::{debug, info};

use crate::command_line::parse_command_line;
use crate::memory_host::MemoryHost;
use crate::{collect_startup_scripts, map_cli_output, map_cli_stdin, StartupArgs};

const EXIT_COMMANDS: &[&str] = &["quit", "exit"];

/// Builds the memory host and its script environment from the startup
/// arguments.
pub(crate) fn start_host(args: &StartupArgs) -> Result<Arc<MemoryHost>, BridgeError> {
    let startup_scripts = collect_startup_scripts(&args.startup, args.startup_dir.as_deref())?;
    let options = EnvironmentOptions {
        startup_scripts,
        bootstrap_path: args.bootstrap.clone(),
        max_operations: args.max_operations,
    };

    let host = MemoryHost::new();
    let context = host.context().ok_or_else(|| {
        BridgeError::new("CLI_HOST", "memory host dropped during startup")
    })?;
    let environment = ScriptEnvironment::start(options, context)?;
    info!(
        commands = environment.registered_commands().len(),
        "memory host ready"
    );
    host.attach(Arc::new(environment));
    Ok(host)
}

/// Parses and runs one command line. Blank lines produce no reply; parse
/// failures are reported as error replies.
pub(crate) fn run_line(host: &MemoryHost, line: &str) -> Option<Reply> {
    match parse_command_line(line) {
        Ok(Some(args)) => Some(host.execute(&args)),
        Ok(None) => None,
        Err(error) => Some(Reply::error(format!("ERR {}", error.message))),
    }
}

pub(crate) fn reply_json(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|_| "\"null\"".to_string())
}

/// Runs each line and writes one JSON reply per line. Returns 1 when any
/// reply was an error.
pub(crate) fn run_exec(
    host: &MemoryHost,
    lines: &[String],
    out: &mut impl Write,
) -> Result<i32, BridgeError> {
    let mut failed = false;
    for line in lines {
        let Some(reply) = run_line(host, line) else {
            continue;
        };
        failed |= reply.is_error();
        writeln!(out, "{}", reply_json(&reply)).map_err(map_cli_output)?;
    }
    Ok(if failed { 1 } else { 0 })
}

/// Reads command lines until end of input or `quit`.
pub(crate) fn run_repl(
    host: &MemoryHost,
    input: impl BufRead,
    out: &mut impl Write,
) -> Result<i32, BridgeError> {
    for line in input.lines() {
        let line = line.map_err(map_cli_stdin)?;
        if EXIT_COMMANDS.contains(&line.trim().to_ascii_lowercase().as_str()) {
            debug!("repl exit requested");
            break;
        }
        let Some(reply) = run_line(host, &line) else {
            continue;
        };
        for display in reply.to_display_lines() {
            writeln!(out, "{}", display).map_err(map_cli_output)?;
        }
        out.flush().map_err(map_cli_output)?;
    }
    Ok(0)
}

pub(crate) fn list_commands(host: &MemoryHost, out: &mut impl Write) -> Result<i32, BridgeError> {
    for spec in host.registered() {
        let line = serde_json::to_string(&spec).unwrap_or_else(|_| spec.name.clone());
        writeln!(out, "{}", line).map_err(map_cli_output)?;
    }
    Ok(0)
}
