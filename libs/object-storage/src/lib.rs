// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Object storage capability.
//!
//! The replicator talks to two buckets that may live on different kinds of
//! servers (an S3-compatible MinIO cluster on one side, Google Cloud
//! Storage on the other). This crate hides the difference behind the
//! [`ObjectStorage`] trait:
//!
//! - [`ObjectStorage::get_object`] opens a lazy handle; [`StoredObject::stat`]
//!   issues the request and reports the authoritative size, content type
//!   and ETag
//! - [`ObjectStorage::put_object`] streams a body up, switching to a
//!   multipart upload once the object exceeds one part
//! - [`ObjectStorage::remove_object`] deletes a key and reports a missing
//!   key as [`StorageError::NotFound`]
//! - [`ObjectStorage::is_offline`] reflects the last availability probe
//!
//! [`ObjectStoreClient`] implements the trait on top of the `object_store`
//! crate; the backend is chosen once, when the client is built.

pub mod client;
pub mod probe;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use client::{GcsSettings, ObjectStoreClient, S3Settings, object_path};
pub use probe::{DEFAULT_PROBE_INTERVAL, watch_availability};

/// Streamed object body.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object {bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("bucket {0} is not served by this client")]
    UnknownBucket(String),

    #[error("object key {key:?} cannot be stored verbatim: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error(transparent)]
    Backend(#[from] object_store::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation exceeded its deadline")]
    DeadlineExceeded,
}

impl StorageError {
    /// Map a backend error for `bucket/key`, keeping "does not exist"
    /// distinguishable from everything else.
    pub fn from_backend(error: object_store::Error, bucket: &str, key: &str) -> Self {
        match error {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Backend(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Short, stable error code in the style of S3 error responses.
    ///
    /// Used as a metric label, so it must stay low-cardinality.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "NoSuchKey",
            StorageError::UnknownBucket(_) => "NoSuchBucket",
            StorageError::InvalidKey { .. } => "InvalidKey",
            StorageError::Backend(error) => match error {
                object_store::Error::NotFound { .. } => "NoSuchKey",
                object_store::Error::PermissionDenied { .. } => "AccessDenied",
                object_store::Error::Unauthenticated { .. } => "Unauthenticated",
                object_store::Error::Precondition { .. } => "PreconditionFailed",
                object_store::Error::NotImplemented => "NotImplemented",
                _ => "BackendError",
            },
            StorageError::Cancelled => "Cancelled",
            StorageError::DeadlineExceeded => "DeadlineExceeded",
        }
    }

    /// Human message without bucket, key or endpoint detail, in the style
    /// of S3 error messages. Used as a metric label.
    pub fn label(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "The specified key does not exist.",
            StorageError::UnknownBucket(_) => "The specified bucket does not exist.",
            StorageError::InvalidKey { .. } => "Object key cannot be stored verbatim.",
            StorageError::Backend(error) => match error {
                object_store::Error::NotFound { .. } => "The specified key does not exist.",
                object_store::Error::PermissionDenied { .. } => "Access Denied.",
                object_store::Error::Unauthenticated { .. } => "Request is not authenticated.",
                object_store::Error::Precondition { .. } => {
                    "At least one of the pre-conditions you specified did not hold."
                }
                object_store::Error::NotImplemented => "Operation is not implemented.",
                _ => "Backend request failed.",
            },
            StorageError::Cancelled => "Operation cancelled.",
            StorageError::DeadlineExceeded => "Operation exceeded its deadline.",
        }
    }
}

// ============================================================================
// Capability
// ============================================================================

/// Authoritative metadata of a stored object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: Option<String>,
    /// ETag with surrounding quotes removed
    pub etag: Option<String>,
}

/// Options for [`ObjectStorage::put_object`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Source ETag, stored as user metadata for auditing
    pub source_etag: Option<String>,
    /// Multipart chunk size in bytes
    pub part_size: usize,
    /// Maximum parts in flight
    pub threads: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            source_etag: None,
            part_size: 16 * 1024 * 1024,
            threads: 4,
        }
    }
}

/// An opened object.
#[async_trait]
pub trait StoredObject: Send {
    /// Fetch (once) and return the object's metadata.
    async fn stat(&mut self) -> Result<ObjectInfo, StorageError>;

    /// Consume the handle and stream the object body.
    async fn into_body(self: Box<Self>) -> Result<ByteStream, StorageError>;
}

/// Uniform access to one storage backend.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Human name used in logs (`source`, `destination`, ...)
    fn name(&self) -> &str;

    fn endpoint(&self) -> String;

    /// True when the last availability probe failed.
    fn is_offline(&self) -> bool;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Box<dyn StoredObject>, StorageError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        options: &UploadOptions,
    ) -> Result<(), StorageError>;

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;
}
