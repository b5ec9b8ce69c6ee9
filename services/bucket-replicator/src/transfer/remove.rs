// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use tokio::time::Instant;

use super::{
    EXCLUDED_PATH, LIFECYCLE_EXPIRED, MessageScope, Replicator, TransferOutcome, TransferRequest,
    queue_wait,
};
use crate::metrics::DeleteObservation;

impl Replicator {
    /// Remove `request.key` from the destination bucket.
    pub async fn remove(&self, request: &TransferRequest<'_>, scope: &MessageScope) -> TransferOutcome {
        let key = request.key;
        let delivery = &request.delivery;

        if self.skip_lifecycle_expired && request.record.is_lifecycle_expiry() {
            tracing::info!("Delete issued by lifecycle expiry, skipping");
            self.metrics
                .observe_delete_skipped(delivery.num_delivered, delivery.queue_age());
            return TransferOutcome::skipped(LIFECYCLE_EXPIRED);
        }

        if let Some(pattern) = self.exclusions.remove_match(key) {
            tracing::info!(pattern, "Key matches remove exclusion, skipping");
            self.metrics
                .observe_delete_skipped(delivery.num_delivered, delivery.queue_age());
            return TransferOutcome::skipped(EXCLUDED_PATH);
        }

        let started = Instant::now();
        let removal = self.destination.remove_object(&self.destination_bucket, key);
        if let Err(error) = scope.run(removal).await {
            return TransferOutcome::storage_failed("remove destination object", error);
        }

        let elapsed = started.elapsed();
        self.metrics.observe_delete(&DeleteObservation {
            elapsed,
            num_delivered: delivery.num_delivered,
            queue_wait: queue_wait(delivery, elapsed),
        });

        tracing::info!(elapsed = %humantime::format_duration(elapsed), "Object removed");
        TransferOutcome::ack()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Fixture;
    use super::*;
    use crate::ack::AckDecision;
    use crate::queue::Delivery;
    use bucket_notification::{LIFECYCLE_EXPIRY_ORIGIN, Record};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use test_case::test_case;
    use tokio_util::sync::CancellationToken;

    fn lifecycle_record() -> Record {
        let mut record = Record::default();
        record.source.user_agent = LIFECYCLE_EXPIRY_ORIGIN.to_string();
        record
    }

    async fn remove(fixture: &Fixture, key: &str, record: &Record) -> TransferOutcome {
        let parent = CancellationToken::new();
        let scope = MessageScope::new(&parent, Duration::from_secs(60));
        let request = TransferRequest {
            key,
            record,
            delivery: Delivery {
                sequence: 9,
                num_delivered: 1,
                enqueued_at: Utc::now(),
            },
        };
        fixture.replicator().remove(&request, &scope).await
    }

    #[tokio::test]
    async fn test_remove_success() {
        let fixture = Fixture::new();
        Fixture::put(&fixture.destination, "tmp/old.txt", b"x").await;

        let outcome = remove(&fixture, "tmp/old.txt", &Record::default()).await;

        assert_eq!(outcome.decision, AckDecision::Ack);
        assert_eq!(Fixture::read(&fixture.destination, "tmp/old.txt").await, None);
        assert_eq!(fixture.metrics.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_object() {
        let fixture = Fixture::new();

        let outcome = remove(&fixture, "tmp/old.txt", &Record::default()).await;

        assert_eq!(outcome.decision, AckDecision::NakThenTerm);
        assert_eq!(fixture.metrics.delete_count(), 0);
    }

    #[test_case("sale/50%off.jpg"; "percent")]
    #[test_case("raw/[1].jpg"; "brackets")]
    #[test_case("home/~user/a.jpg"; "tilde")]
    #[test_case("notes/#1.txt"; "hash")]
    #[tokio::test]
    async fn test_remove_reserved_characters(key: &str) {
        let fixture = Fixture::new();
        Fixture::put(&fixture.destination, key, b"x").await;

        let outcome = remove(&fixture, key, &Record::default()).await;

        assert_eq!(outcome.decision, AckDecision::Ack);
        assert_eq!(Fixture::read(&fixture.destination, key).await, None);
        assert_eq!(fixture.metrics.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_unrepresentable_key_is_terminated() {
        let fixture = Fixture::new();

        let outcome = remove(&fixture, "/leading.txt", &Record::default()).await;

        assert_eq!(outcome.decision, AckDecision::Term);
        assert_eq!(outcome.code(), "InvalidKey");
    }

    #[tokio::test]
    async fn test_lifecycle_expiry_skipped_when_enabled() {
        let mut fixture = Fixture::new();
        fixture.config.skip_lifecycle_expired = true;
        Fixture::put(&fixture.destination, "a", b"x").await;

        let outcome = remove(&fixture, "a", &lifecycle_record()).await;

        assert_eq!(outcome.decision, AckDecision::SkipAck);
        assert_eq!(outcome.code(), LIFECYCLE_EXPIRED);
        assert!(Fixture::read(&fixture.destination, "a").await.is_some());
    }

    #[tokio::test]
    async fn test_lifecycle_expiry_removed_when_disabled() {
        let fixture = Fixture::new();
        Fixture::put(&fixture.destination, "a", b"x").await;

        let outcome = remove(&fixture, "a", &lifecycle_record()).await;

        assert_eq!(outcome.decision, AckDecision::Ack);
        assert_eq!(Fixture::read(&fixture.destination, "a").await, None);
    }

    #[tokio::test]
    async fn test_remove_excluded_key() {
        let mut fixture = Fixture::new();
        fixture.config.exclude_paths.remove_object = vec!["keep".to_string()];
        Fixture::put(&fixture.destination, "dir/keep.txt", b"x").await;

        let outcome = remove(&fixture, "dir/keep.txt", &Record::default()).await;

        assert_eq!(outcome.decision, AckDecision::SkipAck);
        assert_eq!(outcome.code(), EXCLUDED_PATH);
        assert!(Fixture::read(&fixture.destination, "dir/keep.txt").await.is_some());
    }
}
