use serde::{Deserialize, Serialize};

/// Engine-independent view of a script value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptValue {
    Number(f64),
    String(String),
    Array(Vec<ScriptValue>),
    /// Anything the bridge does not look inside: unit, booleans, maps, function pointers.
    Opaque { type_name: String },
}

impl ScriptValue {
    pub fn opaque(type_name: impl Into<String>) -> Self {
        Self::Opaque {
            type_name: type_name.into(),
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Opaque { type_name } => type_name.as_str(),
        }
    }
}

/// Reply produced by a host `call`, as the host processor hands it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallReply {
    String(String),
    Integer(i64),
    Array(Vec<CallReply>),
    /// Reply kinds the bridge has no mapping for, kept as their protocol text.
    Other { raw: String },
}

/// Reply handed back to the host processor for an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reply {
    String(String),
    Integer(i64),
    Double(f64),
    Array(Vec<Reply>),
    Null,
    Error(String),
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Renders the reply the way an interactive client prints it.
    pub fn to_display_lines(&self) -> Vec<String> {
        match self {
            Self::String(value) => vec![format!("\"{}\"", value)],
            Self::Integer(value) => vec![format!("(integer) {}", value)],
            Self::Double(value) => vec![format!("(double) {}", value)],
            Self::Null => vec!["(nil)".to_string()],
            Self::Error(message) => vec![format!("(error) {}", message)],
            Self::Array(items) if items.is_empty() => vec!["(empty array)".to_string()],
            Self::Array(items) => {
                let mut lines = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    let prefix = format!("{}) ", index + 1);
                    let indent = " ".repeat(prefix.len());
                    for (line_index, line) in item.to_display_lines().into_iter().enumerate() {
                        if line_index == 0 {
                            lines.push(format!("{}{}", prefix, line));
                        } else {
                            lines.push(format!("{}{}", indent, line));
                        }
                    }
                }
                lines
            }
        }
    }
}
