use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

pub const DEFAULT_COMMAND_FLAGS: &str = "write deny-oom random";

/// Flag words a host command may carry.
pub const KNOWN_COMMAND_FLAGS: &[&str] = &[
    "write",
    "readonly",
    "admin",
    "deny-oom",
    "deny-script",
    "allow-loading",
    "pubsub",
    "random",
    "allow-stale",
    "no-monitor",
    "fast",
    "getkeys-api",
    "no-cluster",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Warning,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Verbose => "verbose",
            Self::Notice => "notice",
            Self::Warning => "warning",
        }
    }
}

impl FromStr for LogLevel {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "debug" => Ok(Self::Debug),
            "verbose" => Ok(Self::Verbose),
            "notice" => Ok(Self::Notice),
            "warning" => Ok(Self::Warning),
            _ => Err(BridgeError::new(
                "LOG_LEVEL_INVALID",
                format!("Unknown log level \"{}\".", value),
            )),
        }
    }
}

/// Whitespace separated flag words, kept in the order given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFlags(Vec<String>);

impl CommandFlags {
    pub fn parse(text: &str) -> Self {
        Self(text.split_whitespace().map(str::to_string).collect())
    }

    pub fn words(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.0.iter().any(|word| word == flag)
    }

    pub fn unknown_words(&self) -> Vec<&str> {
        self.0
            .iter()
            .map(String::as_str)
            .filter(|word| !KNOWN_COMMAND_FLAGS.contains(word))
            .collect()
    }
}

impl Default for CommandFlags {
    fn default() -> Self {
        Self::parse(DEFAULT_COMMAND_FLAGS)
    }
}

impl fmt::Display for CommandFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// First key index, last key index and step of a command's key arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeySpec {
    pub first: i64,
    pub last: i64,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub flags: CommandFlags,
    pub keys: KeySpec,
}
