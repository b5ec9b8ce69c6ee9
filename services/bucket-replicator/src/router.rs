// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Validate and route one queue message
//!
//! A message is rejected for good (`Term`) when its event kind is not
//! supported or its bucket is not the configured source bucket; those
//! conditions never fix themselves. Payloads that cannot be decoded and
//! keys that cannot be unescaped are retried (`Nak`). Everything else is
//! dispatched per record to the copy or remove path, and each record's
//! decision is signalled and counted exactly once.

use bucket_notification::{Envelope, EventKind, EventNamespace};
use tracing::Instrument;

use crate::ack::{AckDecision, Acknowledger, SignalOutcome};
use crate::metrics::{ProcessedLabels, ProcessedState};
use crate::queue::QueueMessage;
use crate::transfer::{MessageScope, Replicator, TransferRequest};

pub const INVALID_EVENT_NAME: &str = "INT_TERM_INVALID_EVENT_NAME";
pub const INVALID_EVENT_BUCKET: &str = "INT_TERM_INVALID_EVENT_BUCKET";
pub const NO_RECORDS: &str = "INT_TERM_NO_RECORDS";
pub const MAX_DELIVERED: &str = "INT_TERM_MAX_DELIVERED";
pub const MISSING_METADATA: &str = "INT_NAK_MISSING_METADATA";
pub const INVALID_PAYLOAD: &str = "INT_NAK_INVALID_PAYLOAD";
pub const INVALID_KEY: &str = "INT_NAK_INVALID_KEY";

/// One signalled decision.
#[derive(Debug)]
pub struct Handled {
    pub decision: AckDecision,
    pub outcome: SignalOutcome,
}

pub struct Router {
    replicator: Replicator,
    acknowledger: Acknowledger,
    skip_bucket_validation: bool,
}

impl Router {
    pub fn new(replicator: Replicator, acknowledger: Acknowledger, skip_bucket_validation: bool) -> Self {
        Self {
            replicator,
            acknowledger,
            skip_bucket_validation,
        }
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    /// Process one message; returns one entry per signal sent.
    pub async fn handle<M>(&self, message: &M, scope: &MessageScope) -> Vec<Handled>
    where
        M: QueueMessage + ?Sized,
    {
        let delivery = match message.delivery() {
            Ok(delivery) => delivery,
            Err(error) => {
                tracing::error!(error = %error, "Failed to read message metadata");
                let labels = ProcessedLabels {
                    error: "failed to read delivery metadata",
                    code: MISSING_METADATA,
                    ..Default::default()
                };
                return vec![self.settle(message, AckDecision::Nak, 0, &labels).await];
            }
        };

        let envelope = match Envelope::from_slice(message.payload()) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::error!(
                    seq = delivery.sequence,
                    num_delivered = delivery.num_delivered,
                    error = %error,
                    "Failed to decode notification"
                );
                let labels = ProcessedLabels {
                    error: error.label(),
                    code: INVALID_PAYLOAD,
                    ..Default::default()
                };
                return vec![
                    self.settle(message, AckDecision::Nak, delivery.num_delivered, &labels)
                        .await,
                ];
            }
        };

        let event_type = envelope.event_type();
        let span = tracing::info_span!(
            "notification",
            event = %envelope.event_name,
            key = %envelope.key,
            seq = delivery.sequence,
            num_delivered = delivery.num_delivered,
        );
        let mut labels = ProcessedLabels {
            event: &envelope.event_name,
            event_type: &event_type,
            ..Default::default()
        };

        async {
            tracing::info!(records = envelope.records.len(), "Processing notification");

            let kind = match self.validate(&envelope) {
                Ok(kind) => kind,
                Err(code) => {
                    labels.code = code;
                    return vec![
                        self.settle(message, AckDecision::Term, delivery.num_delivered, &labels)
                            .await,
                    ];
                }
            };

            let mut handled = Vec::with_capacity(envelope.records.len());
            for record in &envelope.records {
                let key = match record.decoded_key() {
                    Ok(key) => key,
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to decode object key");
                        let labels = ProcessedLabels {
                            error: error.label(),
                            code: INVALID_KEY,
                            ..labels.clone()
                        };
                        handled.push(
                            self.settle(message, AckDecision::Nak, delivery.num_delivered, &labels)
                                .await,
                        );
                        continue;
                    }
                };

                let request = TransferRequest {
                    key: &key,
                    record,
                    delivery,
                };
                let outcome = match kind.namespace() {
                    EventNamespace::Created => self.replicator.copy(&request, scope).await,
                    EventNamespace::Removed => self.replicator.remove(&request, scope).await,
                };

                // Full error text is logged by the transfer; the label stays
                // free of keys and addresses.
                let error = outcome
                    .failure
                    .as_ref()
                    .map(|failure| failure.error.label())
                    .unwrap_or_default();
                let labels = ProcessedLabels {
                    error,
                    code: outcome.code(),
                    ..labels.clone()
                };
                handled.push(
                    self.settle(message, outcome.decision, delivery.num_delivered, &labels)
                        .await,
                );
            }
            handled
        }
        .instrument(span)
        .await
    }

    /// Check the event kind and bucket; on failure returns the reason code.
    fn validate(&self, envelope: &Envelope) -> Result<EventKind, &'static str> {
        let kind = match EventKind::parse(&envelope.event_name) {
            Ok(kind) => kind,
            Err(error) => {
                tracing::error!(error = %error, "Rejecting notification");
                return Err(INVALID_EVENT_NAME);
            }
        };

        let (bucket, _) = envelope.bucket_and_path();
        let expected = self.replicator.source_bucket();
        if !self.skip_bucket_validation && bucket != expected {
            tracing::error!(bucket, expected, "Rejecting notification for unexpected bucket");
            return Err(INVALID_EVENT_BUCKET);
        }

        if envelope.records.is_empty() {
            tracing::error!("Rejecting notification without records");
            return Err(NO_RECORDS);
        }

        Ok(kind)
    }

    /// Send the signal for `decision` and count the result.
    async fn settle<M>(
        &self,
        message: &M,
        decision: AckDecision,
        num_delivered: u64,
        labels: &ProcessedLabels<'_>,
    ) -> Handled
    where
        M: QueueMessage + ?Sized,
    {
        let outcome = self.acknowledger.signal(decision, message, num_delivered).await;

        let state = match &outcome {
            SignalOutcome::Confirmed if decision == AckDecision::SkipAck => Some(ProcessedState::Skipped),
            SignalOutcome::Confirmed => Some(ProcessedState::Success),
            SignalOutcome::Redelivering(_) => Some(ProcessedState::Failed),
            SignalOutcome::Terminated => Some(ProcessedState::Terminated),
            SignalOutcome::Failed(_) => Some(ProcessedState::SignalFailed),
            SignalOutcome::Untouched => None,
        };

        if let Some(state) = state {
            let escalated = decision == AckDecision::NakThenTerm
                && matches!(outcome, SignalOutcome::Terminated);
            let labels = if escalated {
                ProcessedLabels {
                    code: MAX_DELIVERED,
                    ..labels.clone()
                }
            } else {
                labels.clone()
            };
            self.replicator.metrics().record_processed(state, &labels);
        }

        Handled { decision, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::{MemoryMessage, Signal};
    use crate::transfer::testing::Fixture;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn payload(event: &str, key: &str, object_keys: &[&str]) -> Vec<u8> {
        let records: Vec<_> = object_keys
            .iter()
            .map(|k| json!({"eventName": event, "s3": {"object": {"key": k}}}))
            .collect();
        serde_json::to_vec(&json!({"EventName": event, "Key": key, "Records": records})).unwrap()
    }

    async fn handle(fixture: &Fixture, skip_bucket_validation: bool, message: &MemoryMessage) -> Vec<Handled> {
        let router = Router::new(fixture.replicator(), Acknowledger::new(5), skip_bucket_validation);
        let parent = CancellationToken::new();
        let scope = MessageScope::new(&parent, Duration::from_secs(60));
        router.handle(message, &scope).await
    }

    fn decisions(handled: &[Handled]) -> Vec<AckDecision> {
        handled.iter().map(|h| h.decision).collect()
    }

    #[tokio::test]
    async fn test_copy_event() {
        let fixture = Fixture::new();
        Fixture::put(&fixture.source, "dir/a b.jpg", b"data").await;
        let message = MemoryMessage::delivered(
            payload("s3:ObjectCreated:Put", "photos/dir/a b.jpg", &["dir%2Fa+b.jpg"]),
            1,
            1,
        );

        let handled = handle(&fixture, false, &message).await;

        assert_eq!(decisions(&handled), vec![AckDecision::Ack]);
        assert_eq!(message.log().delivered(), vec![Signal::Confirm]);
        assert!(Fixture::read(&fixture.destination, "dir/a b.jpg").await.is_some());
        assert_eq!(fixture.metrics.processed_total(ProcessedState::Success), 1.0);
    }

    #[tokio::test]
    async fn test_unsupported_event_is_terminated() {
        let fixture = Fixture::new();
        let message = MemoryMessage::delivered(
            payload("s3:ObjectAccessed:Get", "photos/a.jpg", &["a.jpg"]),
            1,
            1,
        );

        let handled = handle(&fixture, false, &message).await;

        assert_eq!(decisions(&handled), vec![AckDecision::Term]);
        assert_eq!(message.log().delivered(), vec![Signal::Terminate]);
        assert_eq!(fixture.metrics.processed_total(ProcessedState::Terminated), 1.0);
        assert!(fixture.metrics.gather().contains(INVALID_EVENT_NAME));
    }

    #[tokio::test]
    async fn test_bucket_mismatch() {
        let fixture = Fixture::new();
        Fixture::put(&fixture.source, "a.jpg", b"data").await;
        let body = payload("s3:ObjectCreated:Put", "other/a.jpg", &["a.jpg"]);

        let message = MemoryMessage::delivered(body.clone(), 1, 1);
        let handled = handle(&fixture, false, &message).await;
        assert_eq!(decisions(&handled), vec![AckDecision::Term]);
        assert!(fixture.metrics.gather().contains(INVALID_EVENT_BUCKET));

        let message = MemoryMessage::delivered(body, 2, 1);
        let handled = handle(&fixture, true, &message).await;
        assert_eq!(decisions(&handled), vec![AckDecision::Ack]);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_retried() {
        let fixture = Fixture::new();
        let message = MemoryMessage::delivered("not json", 1, 2);

        let handled = handle(&fixture, false, &message).await;

        assert_eq!(decisions(&handled), vec![AckDecision::Nak]);
        assert_eq!(
            message.log().delivered(),
            vec![Signal::Redeliver(Duration::from_millis(400))]
        );
    }

    #[tokio::test]
    async fn test_missing_metadata_is_retried() {
        let fixture = Fixture::new();
        let message = MemoryMessage::without_delivery("{}");

        let handled = handle(&fixture, false, &message).await;

        assert_eq!(decisions(&handled), vec![AckDecision::Nak]);
        assert_eq!(
            message.log().delivered(),
            vec![Signal::Redeliver(Duration::from_millis(100))]
        );
    }

    #[tokio::test]
    async fn test_no_records_is_terminated() {
        let fixture = Fixture::new();
        let message = MemoryMessage::delivered(payload("s3:ObjectCreated:Put", "photos/a", &[]), 1, 1);

        let handled = handle(&fixture, false, &message).await;
        assert_eq!(decisions(&handled), vec![AckDecision::Term]);
    }

    #[tokio::test]
    async fn test_one_signal_per_record() {
        let fixture = Fixture::new();
        Fixture::put(&fixture.source, "a", b"1").await;
        let message = MemoryMessage::delivered(
            payload("s3:ObjectCreated:CompleteMultipartUpload", "photos/a", &["a", "missing", "%FF"]),
            1,
            1,
        );

        let handled = handle(&fixture, false, &message).await;

        assert_eq!(
            decisions(&handled),
            vec![AckDecision::Ack, AckDecision::NakThenTerm, AckDecision::Nak]
        );
        assert_eq!(message.log().attempts(), 3);
    }

    #[tokio::test]
    async fn test_missing_object_escalates_past_ceiling() {
        let fixture = Fixture::new();
        let message = MemoryMessage::delivered(
            payload("s3:ObjectRemoved:Delete", "photos/tmp/old.txt", &["tmp/old.txt"]),
            1,
            6,
        );

        let handled = handle(&fixture, false, &message).await;

        assert_eq!(decisions(&handled), vec![AckDecision::NakThenTerm]);
        assert!(matches!(handled[0].outcome, SignalOutcome::Terminated));
        assert_eq!(message.log().delivered(), vec![Signal::Terminate]);
        assert!(fixture.metrics.gather().contains(MAX_DELIVERED));
    }

    #[tokio::test]
    async fn test_failed_keys_share_one_series() {
        let fixture = Fixture::new();
        for (seq, key) in ["missing-1.txt", "missing-2.txt", "missing-3.txt"].iter().enumerate() {
            let message = MemoryMessage::delivered(
                payload("s3:ObjectRemoved:Delete", &format!("photos/{key}"), &[key]),
                seq as u64 + 1,
                1,
            );
            let handled = handle(&fixture, false, &message).await;
            assert_eq!(decisions(&handled), vec![AckDecision::NakThenTerm]);
        }

        let text = fixture.metrics.gather();
        let series: Vec<_> = text
            .lines()
            .filter(|line| line.starts_with("replicator_messages_processed_count{"))
            .collect();
        assert_eq!(series.len(), 1, "{text}");
        assert!(series[0].contains(r#"code="NoSuchKey""#));
        assert!(series[0].ends_with(" 3"));
        assert!(!text.contains("missing-"));
    }

    #[tokio::test]
    async fn test_malformed_key_label_omits_key() {
        let fixture = Fixture::new();
        let message = MemoryMessage::delivered(
            payload("s3:ObjectCreated:Put", "photos/secret", &["secret%ZZ.jpg"]),
            1,
            1,
        );

        let handled = handle(&fixture, false, &message).await;

        assert_eq!(decisions(&handled), vec![AckDecision::Nak]);
        let text = fixture.metrics.gather();
        assert!(text.contains(r#"error="malformed escape in object key""#), "{text}");
        assert!(!text.contains("secret%ZZ"));
    }
}
