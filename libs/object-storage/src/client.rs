// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! [`ObjectStorage`] on top of the `object_store` crate.
//!
//! One client serves exactly one bucket: `object_store` stores are bound to
//! a bucket at build time, so requests naming any other bucket fail with
//! [`StorageError::UnknownBucket`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, GetResult, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    WriteMultipart,
};

use crate::{ByteStream, ObjectInfo, ObjectStorage, StorageError, StoredObject, UploadOptions};

/// User metadata key carrying the source object's ETag.
pub const SOURCE_ETAG_METADATA: &str = "source-etag";

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Connection settings for an S3-compatible server.
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub name: String,
    pub bucket: String,
    /// `host:port`, or a full URL
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
}

impl S3Settings {
    fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.use_ssl {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

/// Connection settings for Google Cloud Storage.
#[derive(Clone, Debug, Default)]
pub struct GcsSettings {
    pub name: String,
    pub bucket: String,
    /// Service account key JSON
    pub service_account_key: String,
}

/// A bucket on one backend, plus its availability flag.
pub struct ObjectStoreClient {
    name: String,
    bucket: String,
    endpoint: String,
    store: Arc<dyn ObjectStore>,
    offline: AtomicBool,
}

impl fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreClient")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("offline", &self.is_offline())
            .finish()
    }
}

impl ObjectStoreClient {
    pub fn s3(settings: &S3Settings) -> Result<Self, StorageError> {
        let endpoint = settings.endpoint_url();
        let region = if settings.region.is_empty() {
            "us-east-1"
        } else {
            settings.region.as_str()
        };

        let store = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(region)
            .with_endpoint(&endpoint)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .build()?;

        Ok(Self::from_store(
            &settings.name,
            &settings.bucket,
            endpoint,
            Arc::new(store),
        ))
    }

    pub fn gcs(settings: &GcsSettings) -> Result<Self, StorageError> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(&settings.bucket)
            .with_service_account_key(&settings.service_account_key)
            .build()?;

        Ok(Self::from_store(
            &settings.name,
            &settings.bucket,
            GCS_ENDPOINT.to_string(),
            Arc::new(store),
        ))
    }

    /// A process-local bucket, for tests and dry runs.
    pub fn in_memory(name: &str, bucket: &str) -> Self {
        Self::from_store(
            name,
            bucket,
            format!("memory://{}", bucket),
            Arc::new(InMemory::new()),
        )
    }

    pub fn from_store(
        name: &str,
        bucket: &str,
        endpoint: String,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            name: name.to_string(),
            bucket: bucket.to_string(),
            endpoint,
            store,
            offline: AtomicBool::new(false),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Record the availability probe result; returns the previous state.
    pub fn set_offline(&self, offline: bool) -> bool {
        self.offline.swap(offline, Ordering::Relaxed)
    }

    fn check_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if bucket == self.bucket {
            Ok(())
        } else {
            Err(StorageError::UnknownBucket(bucket.to_string()))
        }
    }

    async fn put_single(
        &self,
        path: &Path,
        body: ByteStream,
        attributes: Attributes,
    ) -> Result<(), StorageError> {
        let chunks: Vec<_> = body.try_collect().await?;
        let payload: PutPayload = chunks.into_iter().collect();
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store.put_opts(path, payload, options).await?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        path: &Path,
        mut body: ByteStream,
        attributes: Attributes,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        let upload = self
            .store
            .put_multipart_opts(
                path,
                PutMultipartOpts {
                    attributes,
                    ..Default::default()
                },
            )
            .await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, options.part_size);

        let threads = options.threads.max(1);
        let pumped = async {
            while let Some(chunk) = body.try_next().await? {
                writer.wait_for_capacity(threads).await?;
                writer.put(chunk);
            }
            Ok::<(), StorageError>(())
        }
        .await;

        match pumped {
            Ok(()) => {
                writer.finish().await?;
                Ok(())
            }
            Err(error) => {
                if let Err(abort_error) = writer.abort().await {
                    tracing::warn!(
                        storage = %self.name,
                        path = %path,
                        error = %abort_error,
                        "Failed to abort multipart upload"
                    );
                }
                Err(error)
            }
        }
    }
}

fn upload_attributes(options: &UploadOptions) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(content_type) = &options.content_type {
        attributes.insert(Attribute::ContentType, content_type.clone().into());
    }
    if let Some(etag) = &options.source_etag {
        attributes.insert(
            Attribute::Metadata(SOURCE_ETAG_METADATA.into()),
            etag.clone().into(),
        );
    }
    attributes
}

fn object_info(result: &GetResult) -> ObjectInfo {
    ObjectInfo {
        size: result.meta.size as u64,
        content_type: result
            .attributes
            .get(&Attribute::ContentType)
            .map(|value| value.to_string()),
        etag: result
            .meta
            .e_tag
            .as_deref()
            .map(|etag| etag.trim_matches('"').to_string()),
    }
}

/// The store path for `key`, byte for byte.
///
/// `Path::from` would percent-encode reserved characters and collapse empty
/// segments, addressing a different object. Keys that cannot be expressed
/// verbatim (empty, empty segments, `.`/`..` segments, leading or trailing
/// `/`) are rejected with [`StorageError::InvalidKey`].
pub fn object_path(key: &str) -> Result<Path, StorageError> {
    let invalid = |reason: String| StorageError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("empty key".to_string()));
    }
    let path = Path::parse(key).map_err(|error| invalid(error.to_string()))?;
    if path.as_ref() != key {
        return Err(invalid("leading or trailing '/'".to_string()));
    }
    Ok(path)
}

/// Lazily-fetched object.
struct ObjectHandle {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    path: Path,
    fetched: Option<GetResult>,
}

impl ObjectHandle {
    /// Owned request future; the handle is not borrowed across the await.
    fn fetch(&self) -> impl Future<Output = Result<GetResult, StorageError>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let path = self.path.clone();
        let bucket = self.bucket.clone();
        let key = self.key.clone();
        async move {
            store
                .get(&path)
                .await
                .map_err(|e| StorageError::from_backend(e, &bucket, &key))
        }
    }
}

#[async_trait]
impl StoredObject for ObjectHandle {
    async fn stat(&mut self) -> Result<ObjectInfo, StorageError> {
        if let Some(result) = &self.fetched {
            return Ok(object_info(result));
        }
        let result = self.fetch().await?;
        let info = object_info(&result);
        self.fetched = Some(result);
        Ok(info)
    }

    async fn into_body(self: Box<Self>) -> Result<ByteStream, StorageError> {
        let result = match self.fetched {
            Some(result) => result,
            None => self.fetch().await?,
        };
        Ok(result.into_stream().map_err(StorageError::from).boxed())
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Box<dyn StoredObject>, StorageError> {
        self.check_bucket(bucket)?;
        let path = object_path(key)?;
        Ok(Box::new(ObjectHandle {
            store: Arc::clone(&self.store),
            bucket: bucket.to_string(),
            key: key.to_string(),
            path,
            fetched: None,
        }))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        self.check_bucket(bucket)?;
        let path = object_path(key)?;
        let attributes = upload_attributes(options);

        if size <= options.part_size as u64 {
            self.put_single(&path, body, attributes).await
        } else {
            self.put_multipart(&path, body, attributes, options).await
        }
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.check_bucket(bucket)?;
        let path = object_path(key)?;

        // Deletes are idempotent on S3; look first so a missing key is reported.
        self.store
            .head(&path)
            .await
            .map_err(|e| StorageError::from_backend(e, bucket, key))?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| StorageError::from_backend(e, bucket, key))
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        if bucket != self.bucket {
            return Ok(false);
        }
        match self.store.list_with_delimiter(None).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(error) => Err(StorageError::Backend(error)),
        }
    }
}
