//! Diffie-Hellman parameters referenced by the TLS configuration

use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::command::execute;
use crate::config::SslConfig;

/// Make sure the Diffie-Hellman parameters file exists
///
/// An existing file is kept unless `overwrite` is set. openssl writes next to
/// the target and the result is moved in place, so a failed regeneration
/// leaves the previous file untouched. Success is judged by openssl's output
/// file being present, not by its exit status.
pub async fn generate_dhparam(ssl: &SslConfig, overwrite: bool) -> bool {
    let file = Path::new(&ssl.dhparam_file);
    if file.exists() {
        if !overwrite {
            info!("Keep existing Diffie-Hellman file");
            return true;
        }
        warn!("Diffie-Hellman file exists and will be overwritten");
    }

    if let Some(parent) = file.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("Failed to create {}: {}", parent.display(), e);
            return false;
        }
    }

    info!("Generate Diffie-Hellman {} bit parameters file", ssl.dhparam_bits);
    warn!("This could take some time, be patient...");

    let mut staging = file.as_os_str().to_os_string();
    staging.push(".new");
    let staging = PathBuf::from(staging);
    // Leftover of an interrupted run would pass for success
    let _ = std::fs::remove_file(&staging);

    let args = vec![
        "dhparam".to_string(),
        "-out".to_string(),
        staging.to_string_lossy().to_string(),
        ssl.dhparam_bits.to_string(),
    ];
    let output = execute(&ssl.openssl_bin, &args).await;

    if !staging.exists() {
        error!("{}", output.stderr);
        error!("Failed creating {}", ssl.dhparam_file);
        return false;
    }

    if let Err(e) = std::fs::rename(&staging, file) {
        error!("Failed to move {} into place: {}", staging.display(), e);
        return false;
    }

    info!("Successfully created {}", ssl.dhparam_file);
    true
}
