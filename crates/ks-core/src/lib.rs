pub mod error;
pub mod host;
pub mod marshal;
pub mod types;
pub mod value;

pub use error::BridgeError;
pub use host::HostContext;
pub use marshal::{to_host_reply, to_script_value};
pub use types::*;
pub use value::*;
