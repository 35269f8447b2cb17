//! Supervision loop
//!
//! Runs the renewal cycle on a fixed interval next to the supervised server
//! process. OS signals are bridged into a channel so the loop sees them as
//! ordinary events. Cycles never overlap; a shutdown request aborts the
//! running one.

use anyhow::{Context, Result};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::nginx::ServerProcess;
use crate::renewal::{RenewalOrchestrator, RenewalStatus};

/// Exit code when the supervised server stops on its own
pub const SERVER_EXITED_CODE: i32 = 3;

/// Signals the supervisor reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Orderly shutdown (SIGINT/SIGTERM)
    Shutdown(&'static str),
    /// Run one cycle with forced renewal (SIGUSR2)
    ForceRenewal,
}

enum Event {
    Tick,
    Signal(SignalType),
    SignalsClosed,
    ServerExited(Result<ExitStatus>),
}

/// Register SIGINT, SIGTERM and SIGUSR2 and forward them into `tx`
pub fn forward_os_signals(tx: mpsc::Sender<SignalType>) -> Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM")?;
    let mut sigusr2 =
        signal(SignalKind::user_defined2()).context("Failed to register SIGUSR2")?;

    info!("Listen to SIGINT, SIGTERM and SIGUSR2 signals");

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = sigint.recv() => SignalType::Shutdown("SIGINT"),
                _ = sigterm.recv() => SignalType::Shutdown("SIGTERM"),
                _ = sigusr2.recv() => SignalType::ForceRenewal,
            };
            debug!(signal = ?received, "Received signal");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    }))
}

/// Why a renewal cycle stopped
enum CycleEnd {
    Finished(RenewalStatus),
    /// Shutdown requested while the cycle was running, the cycle was dropped
    Interrupted(&'static str),
    ServerExited(Result<ExitStatus>),
}

/// Owns the renewal timer and the served process
pub struct Supervisor {
    orchestrator: Arc<RenewalOrchestrator>,
    interval: Duration,
    server: Option<ServerProcess>,
    signals_open: bool,
    /// SIGUSR2 arrived while a cycle was running
    force_pending: bool,
}

impl Supervisor {
    pub fn new(orchestrator: Arc<RenewalOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            server: None,
            signals_open: true,
            force_pending: false,
        }
    }

    pub fn with_server(mut self, server: ServerProcess) -> Self {
        self.server = Some(server);
        self
    }

    /// Run until shutdown, a failed cycle or the server exiting
    ///
    /// The first cycle starts immediately. Shutdown and server exit are
    /// handled even while a cycle is running. Returns the process exit code;
    /// the server has been stopped by the time this returns.
    pub async fn run(mut self, mut signals: mpsc::Receiver<SignalType>) -> i32 {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting main loop"
        );

        let mut timer = interval(self.interval);
        // A cycle that outlasts the interval swallows the missed ticks
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = if std::mem::take(&mut self.force_pending) {
                Event::Signal(SignalType::ForceRenewal)
            } else {
                tokio::select! {
                    _ = timer.tick() => Event::Tick,
                    received = signals.recv(), if self.signals_open => match received {
                        Some(received) => Event::Signal(received),
                        None => Event::SignalsClosed,
                    },
                    status = wait_for(&mut self.server) => Event::ServerExited(status),
                }
            };

            match event {
                Event::Tick => match self.run_cycle(false, &mut signals).await {
                    CycleEnd::Finished(status) if !status.is_success() => {
                        error!(
                            "Renewal failed with code {}, stopping all processes",
                            status.code()
                        );
                        self.stop_server().await;
                        return status.code();
                    }
                    CycleEnd::Finished(_) => {}
                    CycleEnd::Interrupted(name) => return self.shutdown(name).await,
                    CycleEnd::ServerExited(status) => return self.server_exited(status),
                },
                Event::Signal(SignalType::ForceRenewal) => {
                    info!("Received signal SIGUSR2 -> force renewal of all certificates once!");
                    match self.run_cycle(true, &mut signals).await {
                        CycleEnd::Finished(status) => {
                            if !status.is_success() {
                                warn!("Forced renewal ended with code {}", status.code());
                            }
                            info!("Force renewal has been reset for next renewal attempt");
                        }
                        CycleEnd::Interrupted(name) => return self.shutdown(name).await,
                        CycleEnd::ServerExited(status) => return self.server_exited(status),
                    }
                }
                Event::Signal(SignalType::Shutdown(name)) => return self.shutdown(name).await,
                Event::SignalsClosed => self.signals_closed(),
                Event::ServerExited(status) => return self.server_exited(status),
            }
        }
    }

    /// Drive one cycle while still watching signals and the server
    ///
    /// Dropping the cycle kills a running certbot through `kill_on_drop`.
    async fn run_cycle(
        &mut self,
        force_renewal: bool,
        signals: &mut mpsc::Receiver<SignalType>,
    ) -> CycleEnd {
        let orchestrator = Arc::clone(&self.orchestrator);
        let cycle = orchestrator.run_cycle(force_renewal);
        tokio::pin!(cycle);

        loop {
            tokio::select! {
                status = &mut cycle => return CycleEnd::Finished(status),
                received = signals.recv(), if self.signals_open => match received {
                    Some(SignalType::Shutdown(name)) => {
                        warn!("{} received during renewal, abort renewal", name);
                        return CycleEnd::Interrupted(name);
                    }
                    Some(SignalType::ForceRenewal) => {
                        info!("Renewal in progress, forced renewal starts once it is done");
                        self.force_pending = true;
                    }
                    None => self.signals_closed(),
                },
                status = wait_for(&mut self.server) => return CycleEnd::ServerExited(status),
            }
        }
    }

    async fn shutdown(&mut self, name: &str) -> i32 {
        info!("{} received", name);
        self.stop_server().await;
        info!("Exit with code 0");
        0
    }

    fn server_exited(&mut self, status: Result<ExitStatus>) -> i32 {
        match status {
            Ok(status) => error!("Server closed with {}", status),
            Err(e) => error!("Lost track of server: {:#}", e),
        }
        self.server = None;
        error!("Exit parent process with code {}", SERVER_EXITED_CODE);
        SERVER_EXITED_CODE
    }

    fn signals_closed(&mut self) {
        warn!("Signal channel closed, signals are no longer handled");
        self.signals_open = false;
    }

    async fn stop_server(&mut self) {
        if let Some(mut server) = self.server.take() {
            info!("Stop {} child process...", server.name());
            if let Err(e) = server.shutdown().await {
                error!("Failed to stop {}: {:#}", server.name(), e);
            }
        }
    }
}

async fn wait_for(server: &mut Option<ServerProcess>) -> Result<ExitStatus> {
    match server {
        Some(server) => server.wait().await,
        None => std::future::pending().await,
    }
}
