// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Acknowledgment state machine
//!
//! Every notification record ends in exactly one [`AckDecision`], and
//! [`Acknowledger::signal`] turns that decision into exactly one queue
//! signal:
//!
//! | Decision      | Signal                                                  |
//! |---------------|---------------------------------------------------------|
//! | `Ack`         | confirmed ack, retried a few times                      |
//! | `SkipAck`     | same as `Ack`                                           |
//! | `Nak`         | redeliver after [`backoff_delay`]                       |
//! | `Term`        | terminate; falls back to `Nak` if that fails            |
//! | `NakThenTerm` | `Nak` until the delivery ceiling is passed, then `Term` |
//! | `None`        | nothing                                                 |
//!
//! Signal failures are logged and never propagated: a message whose signal
//! is lost is redelivered by the queue once its ack wait runs out.

use std::time::Duration;

use strum::Display;

use crate::queue::{QueueError, QueueMessage};

/// Delay before the first redelivery.
pub const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Deliveries past this count stop growing the delay (~54m36s).
pub const BACKOFF_MAX_EXPONENT: u64 = 15;

/// Redelivery delay for a message delivered `num_delivered` times:
/// `100ms * 2^min(num_delivered, 15)`.
pub fn backoff_delay(num_delivered: u64) -> Duration {
    let exponent = num_delivered.min(BACKOFF_MAX_EXPONENT) as u32;
    BACKOFF_BASE * 2u32.pow(exponent)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AckDecision {
    /// Transfer succeeded
    Ack,
    /// Deliberately skipped; acknowledged like a success
    SkipAck,
    /// Transient failure; retry with backoff
    Nak,
    /// Permanent failure; never retry
    Term,
    /// Possibly transient; retry up to a delivery ceiling, then give up
    NakThenTerm,
    /// Already handled elsewhere
    None,
}

/// What the queue was actually told.
#[derive(Debug)]
pub enum SignalOutcome {
    Confirmed,
    Redelivering(Duration),
    Terminated,
    /// No signal was sent
    Untouched,
    /// Every attempt failed; the queue's ack wait takes over
    Failed(QueueError),
}

/// Signal timing and the bounded-retry ceiling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acknowledger {
    pub confirm_attempts: u32,
    pub confirm_timeout: Duration,
    pub confirm_pause: Duration,
    /// `NakThenTerm` terminates once a message has been delivered more
    /// times than this. Zero terminates on the first failure.
    pub max_deliveries_before_term: u64,
}

impl Default for Acknowledger {
    fn default() -> Self {
        Self {
            confirm_attempts: 4,
            confirm_timeout: Duration::from_secs(3),
            confirm_pause: Duration::from_secs(1),
            max_deliveries_before_term: 5,
        }
    }
}

impl Acknowledger {
    pub fn new(max_deliveries_before_term: u64) -> Self {
        Self {
            max_deliveries_before_term,
            ..Default::default()
        }
    }

    /// Whether `NakThenTerm` escalates for this delivery count.
    pub fn exhausted(&self, num_delivered: u64) -> bool {
        num_delivered > self.max_deliveries_before_term
    }

    /// Send the one signal `decision` calls for.
    pub async fn signal<M>(&self, decision: AckDecision, message: &M, num_delivered: u64) -> SignalOutcome
    where
        M: QueueMessage + ?Sized,
    {
        match decision {
            AckDecision::Ack | AckDecision::SkipAck => self.confirm(message).await,
            AckDecision::Nak => self.redeliver(message, num_delivered).await,
            AckDecision::Term => self.terminate(message, num_delivered).await,
            AckDecision::NakThenTerm => {
                if self.exhausted(num_delivered) {
                    tracing::warn!(
                        num_delivered,
                        max_deliveries = self.max_deliveries_before_term,
                        "Reached max deliveries"
                    );
                    self.terminate(message, num_delivered).await
                } else {
                    self.redeliver(message, num_delivered).await
                }
            }
            AckDecision::None => SignalOutcome::Untouched,
        }
    }

    async fn confirm<M: QueueMessage + ?Sized>(&self, message: &M) -> SignalOutcome {
        let mut attempt = 1;
        loop {
            match message.confirm(self.confirm_timeout).await {
                Ok(()) => return SignalOutcome::Confirmed,
                Err(error) if attempt >= self.confirm_attempts => {
                    tracing::error!(error = %error, attempt, "Reached maximum ack attempts");
                    return SignalOutcome::Failed(error);
                }
                Err(error) => {
                    tracing::error!(
                        error = %error,
                        attempt,
                        max_attempts = self.confirm_attempts,
                        "Failed to complete ack signal"
                    );
                    tokio::time::sleep(self.confirm_pause).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn terminate<M: QueueMessage + ?Sized>(&self, message: &M, num_delivered: u64) -> SignalOutcome {
        tracing::info!("Sending term signal to stop redelivery");
        match message.terminate().await {
            Ok(()) => SignalOutcome::Terminated,
            Err(error) => {
                tracing::error!(error = %error, "Failed to complete term signal, falling back to nak");
                self.redeliver(message, num_delivered).await
            }
        }
    }

    async fn redeliver<M: QueueMessage + ?Sized>(&self, message: &M, num_delivered: u64) -> SignalOutcome {
        let delay = backoff_delay(num_delivered);
        tracing::info!(
            delay = %humantime::format_duration(delay),
            "Sending nak signal and requesting redelivery"
        );
        match message.redeliver_after(delay).await {
            Ok(()) => SignalOutcome::Redelivering(delay),
            Err(error) => {
                tracing::error!(error = %error, "Failed to complete nak signal");
                SignalOutcome::Failed(error)
            }
        }
    }
}
