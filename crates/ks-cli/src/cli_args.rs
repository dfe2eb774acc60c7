use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "keyscript")]
#[command(about = "Scriptable in-memory key/value host")]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) startup: StartupArgs,
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Args)]
pub(crate) struct StartupArgs {
    /// Startup script, run in the order given. Repeatable.
    #[arg(long = "startup", global = true)]
    pub(crate) startup: Vec<PathBuf>,
    /// Every `*.rhai` file under this directory runs after `--startup` files.
    #[arg(long = "startup-dir", global = true)]
    pub(crate) startup_dir: Option<PathBuf>,
    /// Replaces the embedded bootstrap unit.
    #[arg(long = "bootstrap", global = true)]
    pub(crate) bootstrap: Option<PathBuf>,
    #[arg(long = "max-operations", global = true)]
    pub(crate) max_operations: Option<u64>,
    /// Log filter directive, e.g. `debug` or `ks_runtime=debug,script=info`.
    #[arg(long = "log-level", global = true)]
    pub(crate) log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Exec(ExecArgs),
    Repl,
    Commands,
}

#[derive(Debug, Args)]
pub(crate) struct ExecArgs {
    /// Command lines, each run as one host command.
    #[arg(required = true)]
    pub(crate) lines: Vec<String>,
}
