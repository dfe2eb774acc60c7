use std::ffi::OsString;
use std::io;

use clap::Parser;
use ks_core::BridgeError;

mod cli_args;
mod command_line;
mod error_map;
mod logging;
mod memory_host;
mod session;
mod startup_loader;

pub(crate) use cli_args::{Cli, ExecArgs, Mode, StartupArgs};
pub(crate) use error_map::{
    emit_error, map_cli_logging, map_cli_output, map_cli_startup_read, map_cli_stdin,
};
pub(crate) use startup_loader::collect_startup_scripts;

pub use memory_host::MemoryHost;

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, BridgeError> {
    logging::init_logging(cli.startup.log_level.as_deref()).map_err(map_cli_logging)?;
    let host = session::start_host(&cli.startup)?;
    let mut out = io::stdout().lock();
    match cli.command {
        Mode::Exec(ExecArgs { lines }) => session::run_exec(&host, &lines, &mut out),
        Mode::Repl => session::run_repl(&host, io::stdin().lock(), &mut out),
        Mode::Commands => session::list_commands(&host, &mut out),
    }
}
