use std::sync::OnceLock;

use ks_core::BridgeError;
use regex::Regex;

pub(crate) const EVALSCRIPT: &str = "EVALSCRIPT";

fn token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"\s*(?:"((?:[^"\\]|\\.)*)"|([^\s"]+))"#).expect("token regex must compile")
    })
}

fn evalscript_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?is)^\s*evalscript(?:\s+(.*))?$").expect("evalscript regex must compile")
    })
}

fn parse_error(message: impl Into<String>) -> BridgeError {
    BridgeError::new("CLI_PARSE", message)
}

/// Splits a command line into host command arguments. `EVALSCRIPT` keeps the
/// rest of the line as a single source argument. Blank lines yield `None`.
pub(crate) fn parse_command_line(line: &str) -> Result<Option<Vec<String>>, BridgeError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    if let Some(captures) = evalscript_regex().captures(line) {
        let source = captures.get(1).map(|m| m.as_str().trim_end()).unwrap_or("");
        if source.is_empty() {
            return Err(parse_error("EVALSCRIPT needs a script source."));
        }
        return Ok(Some(vec![EVALSCRIPT.to_string(), source.to_string()]));
    }
    tokenize(line).map(Some)
}

pub(crate) fn tokenize(line: &str) -> Result<Vec<String>, BridgeError> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    for captures in token_regex().captures_iter(line) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() != offset {
            break;
        }
        offset = whole.end();
        match (captures.get(1), captures.get(2)) {
            (Some(quoted), _) => tokens.push(unescape(quoted.as_str())),
            (None, Some(bare)) => tokens.push(bare.as_str().to_string()),
            (None, None) => {}
        }
    }
    if !line[offset..].trim().is_empty() {
        return Err(parse_error(format!(
            "Unbalanced quotes at column {}.",
            offset + line[offset..].len() - line[offset..].trim_start().len() + 1
        )));
    }
    Ok(tokens)
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
