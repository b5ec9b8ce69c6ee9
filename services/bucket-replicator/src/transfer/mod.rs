// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Transfer engine
//!
//! Copies created objects from the source store to the destination and
//! removes deleted ones from the destination. Every blocking storage call
//! runs inside a [`MessageScope`], which aborts it when the message
//! deadline passes or shutdown cancels in-flight transfers. Each transfer
//! returns a [`TransferOutcome`] whose [`AckDecision`] the router turns
//! into a queue signal.

mod copy;
mod remove;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bucket_notification::Record;
use object_storage::{ObjectStorage, StorageError, UploadOptions};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ack::AckDecision;
use crate::config::Config;
use crate::exclusion::ExclusionRules;
use crate::metrics::Metrics;
use crate::queue::Delivery;

/// Skip code for keys matching an exclusion pattern.
pub const EXCLUDED_PATH: &str = "EXCLUDED_PATH";

/// Skip code for deletes issued by source lifecycle expiry.
pub const LIFECYCLE_EXPIRED: &str = "LIFECYCLE_EXPIRED";

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("etag mismatch: notification has {notified:?}, source has {stored:?}")]
    ETagMismatch { notified: String, stored: String },
}

impl TransferError {
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Storage(error) => error.code(),
            TransferError::ETagMismatch { .. } => "ETagMismatch",
        }
    }

    /// Message without object detail, for metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            TransferError::Storage(error) => error.label(),
            TransferError::ETagMismatch { .. } => "ETag does not match the notification.",
        }
    }
}

/// Failed step of a transfer.
#[derive(Debug)]
pub struct TransferFailure {
    pub step: &'static str,
    pub error: TransferError,
}

#[derive(Debug)]
pub struct TransferOutcome {
    pub decision: AckDecision,
    /// Reason code for a skip
    pub skip_code: Option<&'static str>,
    pub failure: Option<TransferFailure>,
}

impl TransferOutcome {
    pub fn ack() -> Self {
        Self {
            decision: AckDecision::Ack,
            skip_code: None,
            failure: None,
        }
    }

    pub fn skipped(code: &'static str) -> Self {
        Self {
            decision: AckDecision::SkipAck,
            skip_code: Some(code),
            failure: None,
        }
    }

    fn failed(decision: AckDecision, step: &'static str, error: impl Into<TransferError>) -> Self {
        let error = error.into();
        tracing::error!(step, code = error.code(), error = %error, "Transfer failed");
        Self {
            decision,
            skip_code: None,
            failure: Some(TransferFailure { step, error }),
        }
    }

    /// Storage failure: a missing object gets bounded retries, a key the
    /// store cannot address is terminated, anything else is retried
    /// indefinitely.
    fn storage_failed(step: &'static str, error: StorageError) -> Self {
        let decision = match error {
            StorageError::NotFound { .. } => AckDecision::NakThenTerm,
            StorageError::InvalidKey { .. } => AckDecision::Term,
            _ => AckDecision::Nak,
        };
        Self::failed(decision, step, error)
    }

    /// Metric code: the skip reason or the failure's error code.
    pub fn code(&self) -> &'static str {
        match (&self.skip_code, &self.failure) {
            (Some(code), _) => code,
            (None, Some(failure)) => failure.error.code(),
            (None, None) => "",
        }
    }
}

/// Cancellation and deadline for one message.
///
/// The token is a child of the transfer-scope token; dropping the scope
/// cancels it.
pub struct MessageScope {
    token: CancellationToken,
    deadline: Instant,
}

impl MessageScope {
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Run a storage call, aborting it on cancellation or deadline.
    pub async fn run<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StorageError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(StorageError::DeadlineExceeded),
            result = call => result,
        }
    }
}

impl Drop for MessageScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// One record to transfer.
#[derive(Clone, Copy, Debug)]
pub struct TransferRequest<'a> {
    /// Decoded object key
    pub key: &'a str,
    pub record: &'a Record,
    pub delivery: Delivery,
}

/// Shared transfer state: both stores, their buckets and the copy/remove
/// policy switches.
pub struct Replicator {
    source: Arc<dyn ObjectStorage>,
    destination: Arc<dyn ObjectStorage>,
    source_bucket: String,
    destination_bucket: String,
    upload: UploadOptions,
    exclusions: ExclusionRules,
    skip_lifecycle_expired: bool,
    wait_for_matching_etag: bool,
    metrics: Arc<Metrics>,
}

impl Replicator {
    pub fn new(
        source: Arc<dyn ObjectStorage>,
        destination: Arc<dyn ObjectStorage>,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            source,
            destination,
            source_bucket: config.source.bucket.clone(),
            destination_bucket: config.destination.storage.bucket.clone(),
            upload: UploadOptions {
                part_size: config.destination.part_size_bytes(),
                threads: config.destination.threads,
                ..Default::default()
            },
            exclusions: ExclusionRules::new(&config.exclude_paths)?,
            skip_lifecycle_expired: config.skip_lifecycle_expired,
            wait_for_matching_etag: config.wait_for_matching_etag,
            metrics,
        })
    }

    pub fn source(&self) -> &Arc<dyn ObjectStorage> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<dyn ObjectStorage> {
        &self.destination
    }

    pub fn source_bucket(&self) -> &str {
        &self.source_bucket
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Either backend is failing its availability probe.
    pub fn storage_offline(&self) -> bool {
        self.source.is_offline() || self.destination.is_offline()
    }
}

/// Time spent queued before processing, excluding the transfer itself.
fn queue_wait(delivery: &Delivery, elapsed: Duration) -> Duration {
    delivery.queue_age().saturating_sub(elapsed)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use bytes::Bytes;
    use futures_util::{StreamExt, TryStreamExt, stream};
    use object_storage::ObjectStoreClient;

    pub struct Fixture {
        pub source: Arc<ObjectStoreClient>,
        pub destination: Arc<ObjectStoreClient>,
        pub metrics: Arc<Metrics>,
        pub config: Config,
    }

    impl Fixture {
        pub fn new() -> Self {
            let mut config = Config::default();
            config.source.bucket = "photos".to_string();
            config.destination.storage.bucket = "backup".to_string();
            Self {
                source: Arc::new(ObjectStoreClient::in_memory("source", "photos")),
                destination: Arc::new(ObjectStoreClient::in_memory("destination", "backup")),
                metrics: Arc::new(Metrics::new().unwrap()),
                config,
            }
        }

        pub fn replicator(&self) -> Replicator {
            Replicator::new(
                self.source.clone(),
                self.destination.clone(),
                &self.config,
                self.metrics.clone(),
            )
            .unwrap()
        }

        pub async fn put(client: &ObjectStoreClient, key: &str, data: &'static [u8]) {
            let body = stream::iter([Ok(Bytes::from_static(data))]).boxed();
            client
                .put_object(client.bucket(), key, body, data.len() as u64, &UploadOptions::default())
                .await
                .unwrap();
        }

        pub async fn read(client: &ObjectStoreClient, key: &str) -> Option<Vec<u8>> {
            let mut object = client.get_object(client.bucket(), key).await.unwrap();
            match object.stat().await {
                Ok(_) => {}
                Err(error) if error.is_not_found() => return None,
                Err(error) => panic!("unexpected error: {error}"),
            }
            let chunks: Vec<Bytes> = object.into_body().await.unwrap().try_collect().await.unwrap();
            Some(chunks.concat())
        }
    }
}
