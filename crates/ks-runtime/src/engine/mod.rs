mod ambient;
mod diagnostics;
mod natives;
mod registry;
mod require;

pub(crate) use ambient::{thread_token, AmbientGuard, OwnerGuard};
pub(crate) use diagnostics::{describe_eval_error, describe_parse_error};
pub(crate) use natives::{install_natives, NativeState};
pub use natives::{HOST_CALL_FN, MAX_HOST_CALL_ARGS};
