use rhai::{EvalAltResult, ParseError, Position};

/// Innermost error message followed by one line per enclosing function or module.
pub(crate) fn describe_eval_error(error: &EvalAltResult) -> String {
    let mut frames = Vec::new();
    let mut current = error;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, position) => {
                frames.push(format!("    at {}{}", name, location(source, *position)));
                current = &**inner;
            }
            EvalAltResult::ErrorInModule(path, inner, position) => {
                frames.push(format!("    in module {}{}", path, location("", *position)));
                current = &**inner;
            }
            _ => break,
        }
    }
    frames.reverse();

    let mut out = current.to_string();
    for frame in frames {
        out.push('\n');
        out.push_str(&frame);
    }
    out
}

pub(crate) fn describe_parse_error(error: &ParseError) -> String {
    format!("Syntax error: {}", error)
}

fn location(source: &str, position: Position) -> String {
    match (position.line(), position.position()) {
        (Some(line), Some(column)) if source.is_empty() => format!(" ({}:{})", line, column),
        (Some(line), Some(column)) => format!(" ({}:{}:{})", source, line, column),
        (Some(line), None) => format!(" ({}:{})", source, line),
        _ if source.is_empty() => String::new(),
        _ => format!(" ({})", source),
    }
}
