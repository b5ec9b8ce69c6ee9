// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use bucket_notification::normalize_etag;
use object_storage::UploadOptions;
use tokio::time::Instant;

use super::{
    EXCLUDED_PATH, MessageScope, Replicator, TransferError, TransferOutcome, TransferRequest,
    queue_wait,
};
use crate::ack::AckDecision;
use crate::format;
use crate::metrics::CopyObservation;

impl Replicator {
    /// Copy `request.key` from the source bucket to the destination bucket.
    ///
    /// The size and content type come from the source object itself; the
    /// notification's values are only used for the optional ETag check.
    pub async fn copy(&self, request: &TransferRequest<'_>, scope: &MessageScope) -> TransferOutcome {
        let key = request.key;
        let delivery = &request.delivery;

        if let Some(pattern) = self.exclusions.copy_match(key) {
            tracing::info!(pattern, "Key matches copy exclusion, skipping");
            self.metrics
                .observe_copy_skipped(delivery.num_delivered, delivery.queue_age());
            return TransferOutcome::skipped(EXCLUDED_PATH);
        }

        let started = Instant::now();

        let mut object = match scope.run(self.source.get_object(&self.source_bucket, key)).await {
            Ok(object) => object,
            Err(error) => return TransferOutcome::storage_failed("get source object", error),
        };

        let info = match scope.run(object.stat()).await {
            Ok(info) => info,
            Err(error) => return TransferOutcome::storage_failed("stat source object", error),
        };

        if self.wait_for_matching_etag {
            let notified = normalize_etag(&request.record.s3.object.e_tag);
            let stored = info.etag.as_deref().map(normalize_etag).unwrap_or_default();
            if notified.is_empty() {
                tracing::debug!("Notification carries no ETag, skipping ETag check");
            } else if notified != stored {
                return TransferOutcome::failed(
                    AckDecision::Nak,
                    "match source etag",
                    TransferError::ETagMismatch {
                        notified: notified.to_string(),
                        stored: stored.to_string(),
                    },
                );
            }
        }

        let options = UploadOptions {
            content_type: info.content_type.clone(),
            source_etag: info.etag.clone(),
            ..self.upload.clone()
        };

        let body = match scope.run(object.into_body()).await {
            Ok(body) => body,
            Err(error) => return TransferOutcome::failed(AckDecision::Nak, "read source object", error),
        };

        let upload = self
            .destination
            .put_object(&self.destination_bucket, key, body, info.size, &options);
        if let Err(error) = scope.run(upload).await {
            return TransferOutcome::failed(AckDecision::Nak, "put destination object", error);
        }

        let elapsed = started.elapsed();
        self.metrics.observe_copy(&CopyObservation {
            elapsed,
            bytes: info.size,
            num_delivered: delivery.num_delivered,
            queue_wait: queue_wait(delivery, elapsed),
        });

        tracing::info!(
            size = %format::size(info.size),
            rate = %format::rate(info.size, elapsed),
            elapsed = %humantime::format_duration(elapsed),
            "Object copied"
        );
        TransferOutcome::ack()
    }
}
