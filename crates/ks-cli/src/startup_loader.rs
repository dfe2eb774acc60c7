use std::path::{Path, PathBuf};

use ks_core::BridgeError;
use walkdir::WalkDir;

use crate::map_cli_startup_read;

const SCRIPT_SUFFIX: &str = ".rhai";

fn absolute(path: &Path) -> Result<PathBuf, BridgeError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .map_err(map_cli_startup_read)?
        .join(path))
}

/// Explicit startup files first, in the order given, then every script
/// under `dir` in path order.
pub(crate) fn collect_startup_scripts(
    files: &[PathBuf],
    dir: Option<&Path>,
) -> Result<Vec<PathBuf>, BridgeError> {
    let mut scripts = files
        .iter()
        .map(|path| absolute(path))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(dir) = dir {
        scripts.extend(read_scripts_from_dir(&absolute(dir)?)?);
    }
    Ok(scripts)
}

pub(crate) fn read_scripts_from_dir(dir: &Path) -> Result<Vec<PathBuf>, BridgeError> {
    if !dir.is_dir() {
        return Err(BridgeError::new(
            "CLI_STARTUP_DIR",
            format!("startup-dir is not a directory: {}", dir.display()),
        ));
    }

    let mut scripts = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|error| map_cli_startup_read(error.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.to_str().is_some_and(|text| text.ends_with(SCRIPT_SUFFIX)) {
            scripts.push(path.to_path_buf());
        }
    }
    Ok(scripts)
}
