// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! In-process queue binding
//!
//! Hands out pre-loaded batches and records every signal sent for each
//! message. Signals can be made to fail so retry and fallback paths can be
//! exercised without a server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{Delivery, FetchError, QueueConnection, QueueError, QueueMessage, Subscription};

/// How long an empty fetch waits before reporting no messages.
pub const FETCH_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Confirm,
    Terminate,
    Redeliver(Duration),
}

impl Signal {
    fn name(&self) -> &'static str {
        match self {
            Signal::Confirm => "confirm",
            Signal::Terminate => "terminate",
            Signal::Redeliver(_) => "redeliver",
        }
    }
}

/// Shared record of signal attempts for one message.
#[derive(Clone, Debug, Default)]
pub struct SignalLog(Arc<Mutex<Vec<(Signal, bool)>>>);

impl SignalLog {
    fn push(&self, signal: Signal, delivered: bool) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((signal, delivered));
    }

    /// Signals the queue accepted, in order.
    pub fn delivered(&self) -> Vec<Signal> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, delivered)| *delivered)
            .map(|(signal, _)| *signal)
            .collect()
    }

    /// Number of attempts, failed or not.
    pub fn attempts(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct MemoryMessage {
    payload: Bytes,
    delivery: Option<Delivery>,
    log: SignalLog,
    confirm_failures: AtomicU32,
    terminate_fails: bool,
    redeliver_fails: bool,
    cancel_on_signal: Option<CancellationToken>,
}

impl MemoryMessage {
    pub fn new(payload: impl Into<Bytes>, delivery: Delivery) -> Self {
        Self {
            payload: payload.into(),
            delivery: Some(delivery),
            log: SignalLog::default(),
            confirm_failures: AtomicU32::new(0),
            terminate_fails: false,
            redeliver_fails: false,
            cancel_on_signal: None,
        }
    }

    /// A message delivered `num_delivered` times, enqueued just now.
    pub fn delivered(payload: impl Into<Bytes>, sequence: u64, num_delivered: u64) -> Self {
        Self::new(
            payload,
            Delivery {
                sequence,
                num_delivered,
                enqueued_at: Utc::now(),
            },
        )
    }

    /// A message whose delivery metadata cannot be read.
    pub fn without_delivery(payload: impl Into<Bytes>) -> Self {
        Self {
            delivery: None,
            ..Self::delivered(payload, 0, 0)
        }
    }

    /// Fail the next `count` confirm attempts.
    pub fn fail_confirms(self, count: u32) -> Self {
        self.confirm_failures.store(count, Ordering::Relaxed);
        self
    }

    pub fn fail_terminate(mut self) -> Self {
        self.terminate_fails = true;
        self
    }

    pub fn fail_redeliver(mut self) -> Self {
        self.redeliver_fails = true;
        self
    }

    /// Cancel `token` when the first signal arrives.
    pub fn cancel_on_signal(mut self, token: CancellationToken) -> Self {
        self.cancel_on_signal = Some(token);
        self
    }

    pub fn log(&self) -> SignalLog {
        self.log.clone()
    }

    fn record(&self, signal: Signal, fails: bool) -> Result<(), QueueError> {
        self.log.push(signal, !fails);
        if let Some(token) = &self.cancel_on_signal {
            token.cancel();
        }
        if fails {
            Err(QueueError::Signal {
                signal: signal.name(),
                reason: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueMessage for MemoryMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery(&self) -> Result<Delivery, QueueError> {
        self.delivery
            .ok_or_else(|| QueueError::Metadata("message has no delivery info".to_string()))
    }

    async fn confirm(&self, _timeout: Duration) -> Result<(), QueueError> {
        let fails = self
            .confirm_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        self.record(Signal::Confirm, fails)
    }

    async fn terminate(&self) -> Result<(), QueueError> {
        self.record(Signal::Terminate, self.terminate_fails)
    }

    async fn redeliver_after(&self, delay: Duration) -> Result<(), QueueError> {
        self.record(Signal::Redeliver(delay), self.redeliver_fails)
    }
}

/// Serves pre-loaded batches, then waits out [`FETCH_WAIT`] per fetch.
#[derive(Default)]
pub struct MemorySubscription {
    batches: VecDeque<Vec<MemoryMessage>>,
    fetches: usize,
}

impl MemorySubscription {
    pub fn new(batches: Vec<Vec<MemoryMessage>>) -> Self {
        Self {
            batches: batches.into(),
            fetches: 0,
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    pub fn remaining_batches(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    type Message = MemoryMessage;

    async fn fetch(
        &mut self,
        _batch: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<MemoryMessage>, FetchError> {
        self.fetches += 1;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if let Some(batch) = self.batches.pop_front() {
            return Ok(batch);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(FETCH_WAIT) => Err(FetchError::NoMessages),
        }
    }
}

/// Connection flag that tests can flip.
#[derive(Debug)]
pub struct MemoryConnection(AtomicBool);

impl MemoryConnection {
    pub fn new(connected: bool) -> Self {
        Self(AtomicBool::new(connected))
    }

    pub fn set_connected(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }
}

impl QueueConnection for MemoryConnection {
    fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
