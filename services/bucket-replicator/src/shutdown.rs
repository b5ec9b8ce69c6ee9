// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Graceful drain
//!
//! [`ShutdownCoordinator`] owns the two cancellation scopes and the task
//! tracker every long-lived worker is spawned on. [`ShutdownCoordinator::drain`]
//! runs the phases in order:
//!
//! 1. cancel the pull scope (no new batches)
//! 2. wait up to `shutdown_wait` for the consumer loop's completion signal,
//!    polling every 250ms; a forced wait runs the full duration so exporters
//!    get a final scrape
//! 3. cancel the transfer scope (abort any running transfer)
//! 4. stop each HTTP server, allowing 500ms before aborting it
//! 5. wait for every tracked task to finish

use std::future::Future;
use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long each HTTP server gets to stop.
pub const SERVER_GRACE: Duration = Duration::from_millis(500);

/// Exit status when a second signal interrupts the drain.
pub const FORCED_EXIT_STATUS: i32 = 99;

struct ServerTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ShutdownCoordinator {
    tracker: TaskTracker,
    pull: CancellationToken,
    transfers: CancellationToken,
    servers: Vec<ServerTask>,
    consumer_done: oneshot::Receiver<&'static str>,
    wait: Duration,
    forced: bool,
}

/// What the drain observed.
#[derive(Debug, PartialEq, Eq)]
pub struct DrainReport {
    /// Status sent by the consumer loop before the transfer scope was cancelled
    pub consumer_status: Option<&'static str>,
}

impl ShutdownCoordinator {
    /// Returns the coordinator and the sender the consumer loop reports on.
    pub fn new(wait: Duration, forced: bool) -> (Self, oneshot::Sender<&'static str>) {
        let (done, consumer_done) = oneshot::channel();
        let coordinator = Self {
            tracker: TaskTracker::new(),
            pull: CancellationToken::new(),
            transfers: CancellationToken::new(),
            servers: Vec::new(),
            consumer_done,
            wait,
            forced,
        };
        (coordinator, done)
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Scope that stops pulling new batches.
    pub fn pull_token(&self) -> CancellationToken {
        self.pull.clone()
    }

    /// Scope that aborts running transfers.
    pub fn transfer_token(&self) -> CancellationToken {
        self.transfers.clone()
    }

    /// Spawn an HTTP server on the tracker. `serve` receives the token that
    /// asks it to stop.
    pub fn spawn_server<F, Fut>(&mut self, name: &'static str, serve: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = self.tracker.spawn(serve(token.clone()));
        self.servers.push(ServerTask {
            name,
            token,
            handle,
        });
    }

    pub async fn drain(self, reason: &str) -> DrainReport {
        let Self {
            tracker,
            pull,
            transfers,
            servers,
            mut consumer_done,
            wait,
            forced,
        } = self;

        tracing::info!(
            reason,
            wait = %humantime::format_duration(wait),
            forced,
            "Starting shutdown"
        );

        pull.cancel();

        let consumer_status = wait_for_consumer(&mut consumer_done, wait, forced).await;

        transfers.cancel();

        for mut server in servers {
            server.token.cancel();
            match tokio::time::timeout(SERVER_GRACE, &mut server.handle).await {
                Ok(_) => tracing::info!(server = server.name, "Server stopped"),
                Err(_) => {
                    tracing::warn!(server = server.name, "Server did not stop in time, aborting");
                    server.handle.abort();
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("Shutdown complete");

        DrainReport { consumer_status }
    }
}

async fn wait_for_consumer(
    done: &mut oneshot::Receiver<&'static str>,
    wait: Duration,
    forced: bool,
) -> Option<&'static str> {
    let deadline = Instant::now() + wait;
    let mut status = None;
    let mut listening = true;

    loop {
        if Instant::now() >= deadline {
            if status.is_some() {
                tracing::info!("Shutdown wait has expired");
            } else {
                tracing::info!("Shutdown wait has expired, running transfer will be terminated");
            }
            return status;
        }

        if listening {
            match done.try_recv() {
                Ok(received) => {
                    tracing::info!(status = received, "All transfers have completed");
                    status = Some(received);
                    listening = false;
                    if !forced {
                        return status;
                    }
                }
                Err(TryRecvError::Closed) => listening = false,
                Err(TryRecvError::Empty) => {}
            }
        }

        tokio::time::sleep_until((Instant::now() + POLL_INTERVAL).min(deadline)).await;
    }
}

/// SIGINT and SIGTERM, registered once.
pub struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next signal; returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    /// Exit the process on the next signal.
    pub fn exit_on_next(mut self) {
        tokio::spawn(async move {
            let name = self.recv().await;
            eprintln!();
            tracing::warn!(signal = name, "Second signal received, exiting immediately");
            std::process::exit(FORCED_EXIT_STATUS);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::GRACEFUL;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_drain_order() {
        let (mut coordinator, done) = ShutdownCoordinator::new(Duration::from_secs(5), false);
        let pull = coordinator.pull_token();
        let transfers = coordinator.transfer_token();

        // consumer: finishes its batch once pulling stops
        coordinator.tracker().spawn(async move {
            pull.cancelled().await;
            let _ = done.send(GRACEFUL);
        });

        // set once the server is asked to stop, if transfers were already cancelled
        let stopped_after_transfers = Arc::new(AtomicBool::new(false));
        let observed = stopped_after_transfers.clone();
        let transfers_at_stop = transfers.clone();
        coordinator.spawn_server("metrics", move |token| async move {
            token.cancelled().await;
            observed.store(transfers_at_stop.is_cancelled(), Ordering::SeqCst);
        });

        let started = Instant::now();
        let report = coordinator.drain("SIGTERM").await;

        assert_eq!(report.consumer_status, Some(GRACEFUL));
        assert!(transfers.is_cancelled());
        assert!(stopped_after_transfers.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_wait_runs_full_duration() {
        let (coordinator, done) = ShutdownCoordinator::new(Duration::from_secs(3), true);
        done.send(GRACEFUL).unwrap();

        let started = Instant::now();
        let report = coordinator.drain("SIGINT").await;

        assert_eq!(report.consumer_status, Some(GRACEFUL));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_transfer_is_cancelled() {
        let (coordinator, _done) = ShutdownCoordinator::new(Duration::from_secs(2), false);
        let transfers = coordinator.transfer_token();

        // a transfer that only ends when aborted
        coordinator.tracker().spawn(async move {
            transfers.cancelled().await;
        });

        let started = Instant::now();
        let report = coordinator.drain("SIGTERM").await;

        assert_eq!(report.consumer_status, None);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_server_is_aborted() {
        let (mut coordinator, _done) = ShutdownCoordinator::new(Duration::ZERO, false);
        coordinator.spawn_server("health", |_token| std::future::pending());

        let started = Instant::now();
        coordinator.drain("SIGTERM").await;

        let elapsed = started.elapsed();
        assert!(elapsed >= SERVER_GRACE);
        assert!(elapsed < SERVER_GRACE * 2);
    }
}
