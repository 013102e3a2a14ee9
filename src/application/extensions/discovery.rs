//! Extension discovery - finds extension libraries on disk and names them

use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR, MAIN_SEPARATOR_STR};

/// Names starting with this are private (package markers, caches) and never loaded
pub const RESERVED_PREFIX: char = '_';

/// Joins path components inside an extension identifier
pub const IDENTIFIER_DELIMITER: char = '.';

/// Dynamic library suffix of the current platform (`so`, `dylib` or `dll`)
pub fn default_suffix() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

fn is_skipped(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX) || name.starts_with('.')
}

/// Walk `root` and collect every extension file ending in `.{suffix}`.
///
/// Returns canonical absolute paths in sorted order. A missing root yields an
/// empty list.
pub fn discover(root: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if !root.exists() {
        tracing::warn!("Extensions directory '{}' does not exist", root.display());
        return files;
    }

    walk(root, suffix, &mut files);
    files.sort();
    files
}

fn walk(dir: &Path, suffix: &str, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_skipped(name) {
            continue;
        }

        // symlinked directories are not followed
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            walk(&path, suffix, out);
            continue;
        }

        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(suffix) {
            match path.canonicalize() {
                Ok(absolute) => out.push(absolute),
                Err(e) => tracing::warn!("Failed to resolve {}: {}", path.display(), e),
            }
        }
    }
}

/// Map an extension file to its identifier.
///
/// The path is taken relative to `base` when it lies inside it (absolute
/// otherwise), the suffix is dropped and separators become `.`:
/// `<base>/extensions/fun/dice.so` is `extensions.fun.dice`.
pub fn path_to_identifier(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .with_extension("")
        .to_string_lossy()
        .replace(MAIN_SEPARATOR, &IDENTIFIER_DELIMITER.to_string())
}

/// Reverse of [`path_to_identifier`]
pub fn identifier_to_path(identifier: &str, base: &Path, suffix: &str) -> PathBuf {
    let mut path = PathBuf::from(identifier.replace(IDENTIFIER_DELIMITER, MAIN_SEPARATOR_STR));
    path.set_extension(suffix);

    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Canonical working directory, the base every identifier is relative to
pub fn working_dir() -> PathBuf {
    std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .unwrap_or_else(|_| PathBuf::from("."))
}
