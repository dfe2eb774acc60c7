use crate::error::BridgeError;
use crate::types::{CommandSpec, LogLevel};
use crate::value::CallReply;

/// The host processor as seen from one invocation.
///
/// An implementation is handed to the runtime for the duration of an
/// invocation and is what native script functions talk to. Implementations
/// must tolerate being called back while the runtime holds its own lock.
pub trait HostContext: Send + Sync {
    /// Runs a host command. `None` means the host produced no result.
    fn call(&self, command: &str, args: &[String]) -> Option<CallReply>;

    /// Creates a host command that dispatches back into the runtime.
    fn create_command(&self, spec: &CommandSpec) -> Result<(), BridgeError>;

    fn log(&self, level: LogLevel, message: &str);
}
