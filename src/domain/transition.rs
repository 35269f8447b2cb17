//! Enable and disable domains by renaming their configuration files
//!
//! nginx refuses to start when a configuration references certificate files
//! that do not exist. Such configurations are parked with a `.pending`
//! suffix and brought back once certbot has produced the files.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::validator::{missing_key_files, validate, KeyFileRef, Rejection};
use super::{active_path, find_files_flat, pending_path, read_lines};

/// Result of a single enable request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
    /// Pending file renamed to its active name
    Enabled,
    /// Active file already present, nothing to do
    AlreadyEnabled,
    /// Neither active nor pending file exists
    PendingMissing,
    /// Pending file no longer passes validation
    Invalid(Rejection),
    /// Pending file still references certificate files that do not exist
    KeyFilesMissing(Vec<PathBuf>),
    /// Rename failed
    RenameFailed(String),
}

impl EnableOutcome {
    /// Stable identifier for structured logs
    pub fn code(&self) -> &'static str {
        match self {
            EnableOutcome::Enabled => "enabled",
            EnableOutcome::AlreadyEnabled => "already_enabled",
            EnableOutcome::PendingMissing => "pending_missing",
            EnableOutcome::Invalid(_) => "invalid",
            EnableOutcome::KeyFilesMissing(_) => "key_files_missing",
            EnableOutcome::RenameFailed(_) => "rename_failed",
        }
    }
}

/// Park every active configuration that references a missing key file
///
/// Best effort: a failed rename is logged and the sweep continues. Returns
/// the number of configurations disabled.
pub fn disable_incomplete_domains(config_dir: &Path) -> usize {
    let mut disabled = 0;

    for path in find_files_flat(config_dir, "*.conf") {
        let missing = missing_key_files(&read_lines(&path));
        if missing.is_empty() {
            continue;
        }

        for key_file in &missing {
            debug!("Key file not found: {}", key_file.display());
        }
        info!("Key files missing for {}, disable domain", path.display());

        let target = pending_path(&path);
        if target.exists() {
            warn!(
                "Could not disable {}: {} already exists",
                path.display(),
                target.display()
            );
            continue;
        }

        match fs::rename(&path, &target) {
            Ok(()) => disabled += 1,
            Err(e) => {
                warn!("Renaming {} failed: {}", path.display(), e);
            }
        }
    }

    disabled
}

/// Re-activate a previously parked domain
///
/// The pending file is validated again, including the existence of every
/// referenced key file, before it is renamed.
pub fn enable_domain(config_dir: &Path, primary: &str, key_ref: &KeyFileRef) -> EnableOutcome {
    let active = active_path(config_dir, primary);
    if active.exists() {
        debug!(domain = %primary, "Domain already enabled");
        return EnableOutcome::AlreadyEnabled;
    }

    let pending = pending_path(&active);
    if !pending.exists() {
        warn!("Could not enable domain, {} not found", pending.display());
        return EnableOutcome::PendingMissing;
    }

    let lines = read_lines(&pending);
    if let Err(rejection) = validate(primary, &lines, key_ref) {
        warn!(
            reason = rejection.code(),
            "Could not enable {}: {}", primary, rejection
        );
        return EnableOutcome::Invalid(rejection);
    }

    let missing = missing_key_files(&lines);
    if !missing.is_empty() {
        warn!("Key files still missing for {}, could not enable domain", primary);
        return EnableOutcome::KeyFilesMissing(missing);
    }

    info!("Enable pending domain {}", primary);
    match fs::rename(&pending, &active) {
        Ok(()) => EnableOutcome::Enabled,
        Err(e) => {
            error!("Renaming {} failed: {}", pending.display(), e);
            EnableOutcome::RenameFailed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        assert_eq!(EnableOutcome::Enabled.code(), "enabled");
        assert_eq!(EnableOutcome::PendingMissing.code(), "pending_missing");
        assert_eq!(
            EnableOutcome::KeyFilesMissing(vec![PathBuf::from("/x.pem")]).code(),
            "key_files_missing"
        );
        assert_eq!(EnableOutcome::Invalid(Rejection::PrimaryNotFirst).code(), "invalid");
    }

    #[test]
    fn test_enable_missing_everything() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let key_ref = KeyFileRef::new("/etc/letsencrypt/live", "privkey.pem");
        assert_eq!(
            enable_domain(temp_dir.path(), "a.com", &key_ref),
            EnableOutcome::PendingMissing
        );
    }

    #[test]
    fn test_disable_empty_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert_eq!(disable_incomplete_domains(temp_dir.path()), 0);
    }
}
