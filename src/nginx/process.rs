//! Supervised server child process

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A child process whose output is relayed into the log
#[derive(Debug)]
pub struct ServerProcess {
    name: String,
    child: Child,
    /// How long an orderly shutdown may take before the child is killed
    grace: Duration,
}

impl ServerProcess {
    /// Spawn `program` and relay its stdout/stderr line by line
    pub fn spawn(name: &str, program: &str, args: &[String], grace: Duration) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Never outlive a parent that bails out without calling shutdown
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", program))?;

        info!("Starting {} as child process with PID {:?}", name, child.id());

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_lines(name.to_string(), stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_lines(name.to_string(), stderr, true));
        }

        Ok(Self {
            name: name.to_string(),
            child,
            grace,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PID while the child has not been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit on its own
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .with_context(|| format!("Failed waiting for {}", self.name))
    }

    /// Ask the child to terminate, kill it if it does not within the grace period
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!("{} already exited with {}", self.name, status);
            return Ok(());
        }

        if let Some(pid) = self.child.id() {
            info!("Send SIGTERM to {} (PID {})", self.name, pid);
            let pid = i32::try_from(pid).context("PID out of range")?;
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!("Failed to signal {}: {}", self.name, e);
            }
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => {
                let status = status.with_context(|| format!("Failed waiting for {}", self.name))?;
                info!("{} exited with {}", self.name, status);
            }
            Err(_) => {
                warn!(
                    "{} did not exit within {}s, killing it",
                    self.name,
                    self.grace.as_secs()
                );
                self.child
                    .kill()
                    .await
                    .with_context(|| format!("Failed to kill {}", self.name))?;
            }
        }

        Ok(())
    }
}

async fn relay_lines<R>(name: String, reader: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(process = %name, "{}", line),
            Ok(Some(line)) => info!(process = %name, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(process = %name, "Output relay stopped: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = ServerProcess::spawn("ghost", "/nonexistent/ghost", &[], Duration::from_secs(1));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to start"));
    }

    #[tokio::test]
    async fn test_wait_for_exit() {
        let mut process = ServerProcess::spawn(
            "sh",
            "sh",
            &["-c".to_string(), "echo started; exit 3".to_string()],
            Duration::from_secs(1),
        )
        .unwrap();
        let status = process.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_shutdown_terminates_child() {
        let mut process = ServerProcess::spawn(
            "sleep",
            "sleep",
            &["30".to_string()],
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(process.id().is_some());

        process.shutdown().await.unwrap();
        assert!(process.id().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_kills_after_grace() {
        let mut process = ServerProcess::spawn(
            "stubborn",
            "sh",
            &["-c".to_string(), "trap '' TERM; sleep 30".to_string()],
            Duration::from_millis(200),
        )
        .unwrap();
        // Give the shell a moment to install the trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        process.shutdown().await.unwrap();
        assert!(process.id().is_none());
    }

    #[tokio::test]
    async fn test_drop_kills_child() {
        let process = ServerProcess::spawn(
            "sleep",
            "sleep",
            &["30".to_string()],
            Duration::from_secs(5),
        )
        .unwrap();
        let pid = process.id().unwrap();
        drop(process);

        // Gone, or a zombie waiting for the runtime to reap it
        let mut stopped = false;
        for _ in 0..100 {
            match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Err(_) => stopped = true,
                Ok(stat) => stopped = stat.contains(") Z "),
            }
            if stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_shutdown_after_exit_is_noop() {
        let mut process =
            ServerProcess::spawn("true", "true", &[], Duration::from_secs(1)).unwrap();
        process.wait().await.unwrap();
        assert!(process.shutdown().await.is_ok());
    }
}
