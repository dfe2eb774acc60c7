use ks_core::ScriptValue;
use rhai::{Array, Dynamic, ImmutableString, FLOAT, INT};

/// Largest magnitude below which every integral f64 is exact.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

pub(crate) fn dynamic_to_script_value(value: Dynamic) -> ScriptValue {
    if value.is_shared() {
        if value.is_locked() {
            return ScriptValue::opaque("locked");
        }
        return dynamic_to_script_value(value.flatten_clone());
    }
    if value.is::<INT>() {
        return ScriptValue::Number(value.cast::<INT>() as f64);
    }
    if value.is::<FLOAT>() {
        return ScriptValue::Number(value.cast::<FLOAT>());
    }
    if value.is::<ImmutableString>() {
        return ScriptValue::String(value.cast::<ImmutableString>().to_string());
    }
    if value.is::<char>() {
        return ScriptValue::String(value.cast::<char>().to_string());
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_script_value(item));
        }
        return ScriptValue::Array(out);
    }

    ScriptValue::opaque(value.type_name())
}

pub(crate) fn script_value_to_dynamic(value: &ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Number(number) => {
            if number.fract() == 0.0 && number.abs() <= MAX_EXACT_INTEGER {
                Dynamic::from_int(*number as INT)
            } else {
                Dynamic::from_float(*number as FLOAT)
            }
        }
        ScriptValue::String(text) => Dynamic::from(text.clone()),
        ScriptValue::Array(items) => {
            let mut array = Array::with_capacity(items.len());
            for item in items {
                array.push(script_value_to_dynamic(item));
            }
            Dynamic::from_array(array)
        }
        ScriptValue::Opaque { .. } => Dynamic::UNIT,
    }
}

/// String form of a value at the host-call boundary.
pub(crate) fn dynamic_to_text(value: &Dynamic) -> String {
    if value.is::<ImmutableString>() {
        return value.clone().cast::<ImmutableString>().to_string();
    }
    value.to_string()
}

pub(crate) fn strings_to_dynamics(args: &[String]) -> Vec<Dynamic> {
    args.iter().map(|arg| Dynamic::from(arg.clone())).collect()
}
