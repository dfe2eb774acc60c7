use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BridgeError {
    pub code: String,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new("COMPILE_ERROR", message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new("RUNTIME_EXCEPTION", message)
    }

    pub fn startup(message: impl Into<String>) -> Self {
        Self::new("STARTUP_FAILED", message)
    }
}
