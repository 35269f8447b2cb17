//! Domain configuration reconciliation
//!
//! nginx domain configurations live as `<domain>.conf` (active) or
//! `<domain>.conf.pending` (disabled) files in one directory. This module
//! scans them, validates them against the certificate layout and moves them
//! between the two states.

pub mod scanner;
pub mod transfer;
pub mod transition;
pub mod validator;

pub use scanner::{find_files_flat, read_lines};
pub use transfer::transfer_user_config;
pub use transition::{disable_incomplete_domains, enable_domain, EnableOutcome};
pub use validator::{missing_key_files, validate, KeyFileRef, Rejection};

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::CertConfig;

/// Suffix of configuration files nginx loads
pub const CONF_SUFFIX: &str = ".conf";

/// Suffix appended to disabled configuration files
pub const PENDING_SUFFIX: &str = ".pending";

/// Extension of certificate material referenced from configurations
pub const KEY_FILE_EXTENSION: &str = ".pem";

/// Primary domain plus the optional names sharing its certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Domain {
    pub primary: String,
    pub optional: Vec<String>,
}

impl Domain {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            optional: Vec::new(),
        }
    }

    /// All names covered by the certificate, primary first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.optional.iter().map(String::as_str))
    }
}

/// Whether a configuration file is loaded by nginx or parked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    Active,
    Pending,
}

/// Domain identity of a configuration file name
///
/// `mysite.com.conf` and `mysite.com.conf.pending` both yield `mysite.com`.
/// Names without the `.conf` suffix have no identity.
pub fn identity_from_path(path: &Path) -> Option<(String, ConfigState)> {
    let name = path.file_name()?.to_str()?;
    let (name, state) = match name.strip_suffix(PENDING_SUFFIX) {
        Some(stripped) => (stripped, ConfigState::Pending),
        None => (name, ConfigState::Active),
    };
    let identity = name.strip_suffix(CONF_SUFFIX)?;
    if identity.is_empty() {
        return None;
    }
    Some((identity.to_string(), state))
}

/// Path of the active configuration file for a domain
pub fn active_path(config_dir: &Path, primary: &str) -> PathBuf {
    config_dir.join(format!("{}{}", primary, CONF_SUFFIX))
}

/// Pending counterpart of an active configuration path
pub fn pending_path(active: &Path) -> PathBuf {
    let mut name = active.as_os_str().to_os_string();
    name.push(PENDING_SUFFIX);
    PathBuf::from(name)
}

/// All domains eligible for certificate renewal
///
/// Both active and pending configuration files are considered, so that a
/// disabled domain still gets its certificate requested. Result is sorted by
/// primary domain.
pub fn valid_domains(config_dir: &Path, cert: &CertConfig) -> Vec<Domain> {
    let key_ref = KeyFileRef::from_config(cert);
    let mut found: BTreeMap<String, (ConfigState, Domain)> = BTreeMap::new();

    for path in find_files_flat(config_dir, "*.conf*") {
        let Some((identity, state)) = identity_from_path(&path) else {
            debug!(path = %path.display(), "Skip file without domain identity");
            continue;
        };

        let lines = read_lines(&path);
        let domain = match validate(&identity, &lines, &key_ref) {
            Ok(domain) => domain,
            Err(Rejection::InvalidName) => {
                debug!("Skip {}: not a valid domain", identity);
                continue;
            }
            Err(rejection) => {
                warn!("Skip {}: {}", identity, rejection);
                continue;
            }
        };

        match found.get(&domain.primary) {
            Some((ConfigState::Active, _)) => {
                warn!(
                    "Skip {}: domain {} already configured by an active file",
                    path.display(),
                    domain.primary
                );
            }
            Some((ConfigState::Pending, _)) if state == ConfigState::Pending => {
                warn!(
                    "Skip {}: domain {} already configured by a pending file",
                    path.display(),
                    domain.primary
                );
            }
            _ => {
                found.insert(domain.primary.clone(), (state, domain));
            }
        }
    }

    found.into_values().map(|(_, domain)| domain).collect()
}
