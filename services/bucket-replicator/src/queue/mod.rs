// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Notification queue capability
//!
//! The replicator pulls notifications from a durable, at-least-once queue.
//! A [`Subscription`] yields batches of [`QueueMessage`]s; each message
//! carries its [`Delivery`] metadata and exposes the three signals the ack
//! state machine needs (confirm, terminate, redeliver after a delay).
//!
//! - [`jetstream`] - NATS JetStream binding used in production
//! - [`memory`] - in-process binding that records signals, for tests

pub mod jetstream;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Per-delivery metadata supplied by the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Stream sequence; stable across redeliveries
    pub sequence: u64,
    /// Delivery attempts so far, including this one
    pub num_delivered: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    /// Time spent in the queue up to now.
    pub fn queue_age(&self) -> Duration {
        (Utc::now() - self.enqueued_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to read delivery metadata: {0}")]
    Metadata(String),

    #[error("{signal} signal failed: {reason}")]
    Signal { signal: &'static str, reason: String },

    #[error("{signal} signal timed out after {timeout:?}")]
    Timeout {
        signal: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The fetch deadline passed with nothing to deliver
    #[error("no messages available")]
    NoMessages,

    #[error("fetch cancelled")]
    Cancelled,

    #[error("failed to fetch messages: {0}")]
    Transport(String),
}

/// One delivered notification.
#[async_trait]
pub trait QueueMessage: Send + Sync {
    fn payload(&self) -> &[u8];

    fn delivery(&self) -> Result<Delivery, QueueError>;

    /// Acknowledge and wait for the server to confirm it.
    async fn confirm(&self, timeout: Duration) -> Result<(), QueueError>;

    /// Stop redelivery for good.
    async fn terminate(&self) -> Result<(), QueueError>;

    /// Negative-acknowledge, asking for redelivery after `delay`.
    async fn redeliver_after(&self, delay: Duration) -> Result<(), QueueError>;
}

/// Pull side of the queue.
#[async_trait]
pub trait Subscription: Send {
    type Message: QueueMessage;

    /// Pull up to `batch` messages.
    ///
    /// Returns [`FetchError::NoMessages`] when the fetch deadline passes
    /// empty-handed and [`FetchError::Cancelled`] once `cancel` fires.
    async fn fetch(
        &mut self,
        batch: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Message>, FetchError>;
}

/// Connection state, for readiness checks.
pub trait QueueConnection: Send + Sync {
    fn is_connected(&self) -> bool;
}
