//! Conversions between host replies and script values.
//!
//! Both directions work on the tagged models in [`crate::value`] and never
//! touch the scripting engine. Host to script is total; script to host is
//! lossy and degrades to [`Reply::Null`] instead of failing.

use crate::value::{CallReply, Reply, ScriptValue};

pub fn to_script_value(reply: &CallReply) -> ScriptValue {
    match reply {
        CallReply::String(value) => ScriptValue::String(value.clone()),
        // Precision loss above 2^53 is accepted.
        CallReply::Integer(value) => ScriptValue::Number(*value as f64),
        CallReply::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_script_value(item));
            }
            ScriptValue::Array(out)
        }
        CallReply::Other { raw } => ScriptValue::String(raw.clone()),
    }
}

pub fn to_host_reply(value: &ScriptValue) -> Reply {
    match value {
        ScriptValue::Array(items) => Reply::Array(items.iter().map(to_host_reply).collect()),
        ScriptValue::Number(number) => match as_int32(*number) {
            Some(integer) => Reply::Integer(integer as i64),
            None => Reply::Double(*number),
        },
        ScriptValue::String(value) => Reply::String(value.clone()),
        ScriptValue::Opaque { .. } => Reply::Null,
    }
}

fn as_int32(number: f64) -> Option<i32> {
    if number.fract() != 0.0 || number < i32::MIN as f64 || number > i32::MAX as f64 {
        return None;
    }
    // -0.0 is not an int32.
    if number == 0.0 && number.is_sign_negative() {
        return None;
    }
    Some(number as i32)
}
