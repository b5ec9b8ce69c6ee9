// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Pull/dispatch loop
//!
//! Runs on a single task. Two tokens drive it: the pull-scope token stops
//! new fetches, the transfer-scope token aborts in-flight transfers. Each
//! message gets its own [`MessageScope`] whose deadline fires before the
//! queue's ack wait does, so the queue never redelivers a message this
//! process still believes it owns.

use std::time::Duration;

use object_storage::ObjectStorage;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::queue::{FetchError, Subscription};
use crate::router::Router;
use crate::transfer::MessageScope;

/// Pause between pulls while a storage backend is offline.
pub const OFFLINE_WAIT: Duration = Duration::from_secs(10);

/// Pause after a failed pull.
pub const FETCH_ERROR_WAIT: Duration = Duration::from_secs(1);

/// Completion status sent when the loop stops because pulling was cancelled.
pub const GRACEFUL: &str = "graceful";

pub struct ConsumerLoop {
    router: Router,
    batch_size: usize,
    message_timeout: Duration,
}

impl ConsumerLoop {
    /// `message_timeout` is the per-message deadline, already reduced by
    /// the safety margin.
    pub fn new(router: Router, batch_size: usize, message_timeout: Duration) -> Self {
        Self {
            router,
            batch_size: batch_size.max(1),
            message_timeout,
        }
    }

    /// Pull and process until `pull` is cancelled, then report on `done`.
    pub async fn run<S: Subscription>(
        &self,
        subscription: &mut S,
        pull: &CancellationToken,
        transfers: &CancellationToken,
        done: oneshot::Sender<&'static str>,
    ) {
        let mut offline = false;

        'pull: loop {
            if let Some(storage) = self.offline_storage() {
                if !offline {
                    tracing::info!(
                        storage = storage.name(),
                        endpoint = %storage.endpoint(),
                        "Waiting while storage is offline"
                    );
                    offline = true;
                }
                tokio::select! {
                    _ = pull.cancelled() => break 'pull,
                    _ = tokio::time::sleep(OFFLINE_WAIT) => continue 'pull,
                }
            }
            if offline {
                tracing::info!("Storage is back online, resuming");
                offline = false;
            }

            let batch = match subscription.fetch(self.batch_size, pull).await {
                Ok(batch) => batch,
                Err(FetchError::NoMessages) => continue,
                Err(FetchError::Cancelled) => break,
                Err(error) => {
                    tracing::error!(error = %error, "Failed to fetch a new batch of messages");
                    tokio::select! {
                        _ = pull.cancelled() => break 'pull,
                        _ = tokio::time::sleep(FETCH_ERROR_WAIT) => continue 'pull,
                    }
                }
            };

            for message in &batch {
                if self.batch_size > 1 && pull.is_cancelled() {
                    break 'pull;
                }
                let scope = MessageScope::new(transfers, self.message_timeout);
                self.router.handle(message, &scope).await;
            }
        }

        tracing::info!("Stopping event pull processing");
        if done.send(GRACEFUL).is_err() {
            tracing::debug!("Shutdown coordinator is no longer waiting");
        }
    }

    fn offline_storage(&self) -> Option<&dyn ObjectStorage> {
        let replicator = self.router.replicator();
        [replicator.source(), replicator.destination()]
            .into_iter()
            .find(|storage| storage.is_offline())
            .map(|storage| storage.as_ref())
    }
}
