//! nginx as the served process
//!
//! Configuration test and reload go through the [`WebServer`] trait so the
//! renewal cycle can run against anything that understands those two
//! operations. The long running server itself is handled by
//! [`process::ServerProcess`].

pub mod dhparam;
pub mod process;

pub use dhparam::generate_dhparam;
pub use process::ServerProcess;

use async_trait::async_trait;
use tracing::info;

use crate::command::execute;

/// Operations the renewal cycle needs from the web server
#[async_trait]
pub trait WebServer: Send + Sync {
    /// Check that the on-disk configuration is loadable
    async fn test_configuration(&self) -> bool;

    /// Make the running server pick up configuration and certificates
    ///
    /// Returns the error output of the reload, empty only when nginx exited
    /// cleanly without printing anything there.
    async fn reload(&self) -> String;
}

/// Drives the nginx binary
#[derive(Debug, Clone)]
pub struct Nginx {
    binary: String,
}

impl Nginx {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments running nginx in the foreground
    pub fn foreground_args() -> Vec<String> {
        vec!["-g".to_string(), "daemon off;".to_string()]
    }

    /// Start nginx in the foreground as a supervised child
    pub fn spawn(&self, grace: std::time::Duration) -> anyhow::Result<ServerProcess> {
        ServerProcess::spawn("nginx", &self.binary, &Self::foreground_args(), grace)
    }
}

#[async_trait]
impl WebServer for Nginx {
    async fn test_configuration(&self) -> bool {
        let output = execute(&self.binary, &["-t".to_string()]).await;
        // nginx reports the test result on stderr even when it passes
        if !output.stderr.is_empty() {
            info!(target: "nginx", "{}", output.stderr);
        }
        output.success
    }

    async fn reload(&self) -> String {
        let output = execute(&self.binary, &["-s".to_string(), "reload".to_string()]).await;
        // Anything nginx prints on stderr counts, warnings on a zero exit included
        if !output.stderr.is_empty() {
            return output.stderr;
        }
        if output.success {
            String::new()
        } else {
            format!("{} -s reload exited with failure", self.binary)
        }
    }
}
