use ks_core::BridgeError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> BridgeError {
    BridgeError::new(code, error.to_string())
}

pub(crate) fn emit_error(error: BridgeError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"Unknown error\"".to_string())
    );
    1
}

pub(crate) fn map_cli_startup_read(error: std::io::Error) -> BridgeError {
    map_error("CLI_STARTUP_READ", error)
}

pub(crate) fn map_cli_stdin(error: std::io::Error) -> BridgeError {
    map_error("CLI_STDIN", error)
}

pub(crate) fn map_cli_output(error: std::io::Error) -> BridgeError {
    map_error("CLI_OUTPUT", error)
}

pub(crate) fn map_cli_logging(error: anyhow::Error) -> BridgeError {
    map_error("CLI_LOGGING", format!("{:#}", error))
}
