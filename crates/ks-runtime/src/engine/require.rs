use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope};
use tracing::debug;

use super::diagnostics::describe_parse_error;

pub(crate) const EXPORTS_VARIABLE: &str = "exports";
pub(crate) const SCRIPT_EXTENSION: &str = "rhai";

/// Files currently being loaded, innermost last.
pub(crate) struct ResolutionStack {
    paths: Mutex<Vec<PathBuf>>,
}

impl ResolutionStack {
    pub(crate) fn new() -> Self {
        Self {
            paths: Mutex::new(Vec::new()),
        }
    }

    /// Resolves a specifier against the directory of the innermost loading
    /// file, or as given when nothing is loading.
    pub(crate) fn resolve(&self, specifier: &str) -> PathBuf {
        let requested = Path::new(specifier);
        if requested.is_absolute() {
            return normalize(requested);
        }
        match self.paths().last() {
            Some(loading) => {
                let base = loading.parent().unwrap_or_else(|| Path::new(""));
                normalize(&base.join(requested))
            }
            None => normalize(requested),
        }
    }

    pub(crate) fn enter(&self, path: PathBuf) -> ResolutionEntry<'_> {
        self.paths().push(path);
        ResolutionEntry { stack: self }
    }

    pub(crate) fn depth(&self) -> usize {
        self.paths().len()
    }

    fn paths(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pops its path from the resolution stack when dropped.
pub(crate) struct ResolutionEntry<'a> {
    stack: &'a ResolutionStack,
}

impl Drop for ResolutionEntry<'_> {
    fn drop(&mut self) {
        self.stack.paths().pop();
    }
}

/// Lexically removes `.` and `..` components without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_with_normal = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if ends_with_normal {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Picks the file to read: the resolved path itself, or the same path with
/// the script extension when the specifier left it off.
fn locate(resolved: PathBuf) -> PathBuf {
    if resolved.is_file() || resolved.extension().is_some() {
        return resolved;
    }
    let with_extension = resolved.with_extension(SCRIPT_EXTENSION);
    if with_extension.is_file() {
        with_extension
    } else {
        resolved
    }
}

/// Loads `specifier` as an isolated module and returns its `exports` value.
pub(crate) fn require_module(
    engine: &Engine,
    stack: &ResolutionStack,
    specifier: &str,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let path = locate(stack.resolve(specifier));
    let path_text = path.display().to_string();
    let source = fs::read_to_string(&path).map_err(|error| {
        Box::new(EvalAltResult::ErrorModuleNotFound(
            format!("{} ({})", specifier, error),
            Position::NONE,
        ))
    })?;

    let _entry = stack.enter(path.clone());
    debug!(module = %path_text, depth = stack.depth(), "loading module");

    let mut ast = engine.compile(&source).map_err(|error| {
        Box::new(EvalAltResult::ErrorInModule(
            path_text.clone(),
            Box::new(EvalAltResult::ErrorRuntime(
                Dynamic::from(describe_parse_error(&error)),
                Position::NONE,
            )),
            Position::NONE,
        ))
    })?;
    ast.set_source(path_text.as_str());

    let mut scope = Scope::new();
    scope.push(EXPORTS_VARIABLE, Map::new());
    engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        .map_err(|error| {
            Box::new(EvalAltResult::ErrorInModule(
                path_text.clone(),
                error,
                Position::NONE,
            ))
        })?;

    Ok(scope
        .get_value::<Dynamic>(EXPORTS_VARIABLE)
        .unwrap_or(Dynamic::UNIT))
}
