//! Copy user supplied domain configurations into the nginx directory

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::find_files_flat;

/// Copy everything in `from` into `to`, replacing files with the same name
///
/// A missing source directory is not an error. Returns the number of active
/// configuration files in `to` afterwards.
pub fn transfer_user_config(from: &Path, to: &Path) -> Result<usize> {
    if !from.exists() {
        debug!("User configuration directory {} does not exist", from.display());
        return Ok(0);
    }

    copy_dir(from, to)?;
    Ok(find_files_flat(to, "*.conf").len())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)
        .with_context(|| format!("Failed to create directory: {}", to.display()))?;

    let entries = fs::read_dir(from)
        .with_context(|| format!("Failed to read directory: {}", from.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", from.display()))?;
        let source = entry.path();
        let target = to.join(entry.file_name());

        if source.is_dir() {
            copy_dir(&source, &target)?;
        } else {
            fs::copy(&source, &target).with_context(|| {
                format!("Failed to copy {} to {}", source.display(), target.display())
            })?;
        }
    }

    Ok(())
}
