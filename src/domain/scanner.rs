//! Flat directory listing and line reading for configuration files

use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Find regular files in `dir` whose name matches the shell pattern
///
/// Subdirectories are not descended into. Results are sorted by path.
pub fn find_files_flat(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let pattern = match Pattern::new(pattern) {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Invalid file pattern {:?}: {}", pattern, e);
            return Vec::new();
        }
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not read directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        // Follows symlinks
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| pattern.matches(name))
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();

    files.sort();
    files
}

/// Split text on `\r\n` or `\n`
///
/// An empty text yields one empty line and a trailing terminator yields a
/// trailing empty line.
pub fn split_lines(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Read a file as lines, see [`split_lines`]
///
/// A file that cannot be read yields no lines at all.
pub fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(content) => split_lines(&content),
        Err(e) => {
            warn!("Could not read {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
