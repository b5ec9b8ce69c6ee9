// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Replicator configuration
//!
//! Loaded from a TOML file. Every field has a default except the bucket
//! names, so a minimal file only needs `source.bucket` and
//! `destination.bucket`. Durations use humantime syntax (`30m`, `500ms`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use object_storage::{GcsSettings, ObjectStoreClient, S3Settings};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Time reserved between the internal transfer deadline and the queue's
/// ack wait, so a message is abandoned before it can be redelivered.
pub const MSG_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Smallest part size S3 accepts for multipart uploads.
const MIN_PART_SIZE_MB: usize = 5;

const REDACTED: &str = "REDACTED";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// Queue ack wait; transfers are cut off [`MSG_TIMEOUT_MARGIN`] earlier
    #[serde(with = "humantime_format")]
    pub msg_timeout: Duration,
    /// How long shutdown waits for the running transfer to finish
    #[serde(with = "humantime_format")]
    pub shutdown_wait: Duration,
    /// Keep waiting out `shutdown_wait` after the consumer loop finished,
    /// so exporters get a final scrape
    pub shutdown_wait_forced: bool,
    pub skip_lifecycle_expired: bool,
    pub skip_event_bucket_validation: bool,
    pub wait_for_matching_etag: bool,
    /// Deliveries after which a vanished object is given up on
    pub max_deliveries_before_term: u64,
    pub source: StorageConfig,
    pub destination: DestinationConfig,
    pub exclude_paths: ExcludePaths,
    pub health_check: HealthCheckConfig,
    pub metrics: MetricsConfig,
    pub jetstream: JetStreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            msg_timeout: Duration::from_secs(30 * 60),
            shutdown_wait: Duration::ZERO,
            shutdown_wait_forced: true,
            skip_lifecycle_expired: false,
            skip_event_bucket_validation: false,
            wait_for_matching_etag: false,
            max_deliveries_before_term: 5,
            source: StorageConfig {
                name: "source".to_string(),
                ..Default::default()
            },
            destination: DestinationConfig::default(),
            exclude_paths: ExcludePaths::default(),
            health_check: HealthCheckConfig::default(),
            metrics: MetricsConfig::default(),
            jetstream: JetStreamConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    /// S3-compatible server such as MinIO
    #[default]
    S3,
    /// Google Cloud Storage
    Gcs,
}

/// One side of the replication.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub name: String,
    pub backend: Backend,
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Service account key JSON (GCS)
    pub google_credentials: String,
    pub use_ssl: bool,
}

impl StorageConfig {
    /// Build the client for this backend.
    pub fn client(&self) -> Result<ObjectStoreClient> {
        let client = match self.backend {
            Backend::S3 => ObjectStoreClient::s3(&S3Settings {
                name: self.name.clone(),
                bucket: self.bucket.clone(),
                endpoint: self.endpoint.clone(),
                region: self.region.clone(),
                access_key: self.access_key.clone(),
                secret_key: self.secret_key.clone(),
                use_ssl: self.use_ssl,
            }),
            Backend::Gcs => ObjectStoreClient::gcs(&GcsSettings {
                name: self.name.clone(),
                bucket: self.bucket.clone(),
                service_account_key: self.google_credentials.clone(),
            }),
        };
        client.with_context(|| format!("Failed to set up the {} storage client", self.name))
    }

    fn redact(&mut self) {
        for secret in [
            &mut self.access_key,
            &mut self.secret_key,
            &mut self.google_credentials,
        ] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    #[serde(flatten)]
    pub storage: StorageConfig,
    /// Multipart upload part size, in MB
    pub part_size_mb: usize,
    /// Parts uploaded concurrently
    pub threads: usize,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                name: "destination".to_string(),
                ..Default::default()
            },
            part_size_mb: 16,
            threads: 4,
        }
    }
}

impl DestinationConfig {
    pub fn part_size_bytes(&self) -> usize {
        self.part_size_mb * 1024 * 1024
    }
}

/// Key patterns (regex, unanchored) that are never replicated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludePaths {
    pub copy_object: Vec<String>,
    pub remove_object: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub disabled: bool,
    pub port: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9999 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JetStreamConfig {
    pub url: String,
    pub subject: String,
    pub username: String,
    pub password: String,
    /// CA bundle for TLS connections
    pub root_ca: Option<PathBuf>,
    /// Use the stream and consumer as they exist on the server
    pub provisioning_disabled: bool,
    pub batch_size: usize,
    pub stream: StreamConfig,
    pub consumer: ConsumerConfig,
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject: "bucket-replicator-events".to_string(),
            username: String::new(),
            password: String::new(),
            root_ca: None,
            provisioning_disabled: false,
            batch_size: 1,
            stream: StreamConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Retention {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    /// Zero keeps messages forever
    #[serde(with = "humantime_format")]
    pub max_age: Duration,
    /// In MB; -1 is unlimited
    pub max_size_mb: i64,
    pub replicas: usize,
    pub retention: Retention,
    /// Republish every notification into an archive stream
    pub republish: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "bucket-replicator-stream".to_string(),
            max_age: Duration::ZERO,
            max_size_mb: -1,
            replicas: 1,
            retention: Retention::Limits,
            republish: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub name: String,
    pub max_ack_pending: i64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "bucket-replicator-consumer".to_string(),
            max_ack_pending: 1000,
        }
    }
}

impl Config {
    /// Load and validate a TOML config file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        // A `[source]` table replaces the whole default, name included.
        if config.source.name.is_empty() {
            config.source.name = "source".to_string();
        }
        if config.destination.storage.name.is_empty() {
            config.destination.storage.name = "destination".to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.source.bucket.is_empty(), "source.bucket is required");
        ensure!(
            !self.destination.storage.bucket.is_empty(),
            "destination.bucket is required"
        );
        if self.msg_timeout <= MSG_TIMEOUT_MARGIN {
            bail!(
                "msg_timeout ({}) must be longer than {}",
                humantime::format_duration(self.msg_timeout),
                humantime::format_duration(MSG_TIMEOUT_MARGIN)
            );
        }
        ensure!(self.jetstream.batch_size >= 1, "jetstream.batch_size must be at least 1");
        ensure!(
            self.destination.part_size_mb >= MIN_PART_SIZE_MB,
            "destination.part_size_mb must be at least {}",
            MIN_PART_SIZE_MB
        );
        ensure!(self.destination.threads >= 1, "destination.threads must be at least 1");
        for pattern in self
            .exclude_paths
            .copy_object
            .iter()
            .chain(&self.exclude_paths.remove_object)
        {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid exclude path pattern: {}", pattern))?;
        }
        Ok(())
    }

    /// Deadline for a single message's transfer.
    pub fn transfer_timeout(&self) -> Duration {
        self.msg_timeout.saturating_sub(MSG_TIMEOUT_MARGIN)
    }

    /// A copy with every credential replaced, safe to log.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.source.redact();
        config.destination.storage.redact();
        if !config.jetstream.password.is_empty() {
            config.jetstream.password = REDACTED.to_string();
        }
        config
    }
}

/// Serde adapter for humantime durations.
mod humantime_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(serde::de::Error::custom)
    }
}
