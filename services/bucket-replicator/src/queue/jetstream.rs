// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! NATS JetStream binding
//!
//! On startup the stream and the durable pull consumer are created (or
//! updated to match the config) unless provisioning is disabled. When
//! republishing is enabled every notification is also copied to
//! `<subject>-archive`, which a second stream (`<stream>-archive`) keeps;
//! the main stream then switches to interest retention so it only holds
//! messages the consumer has not acknowledged yet.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, pull};
use async_nats::jetstream::stream::{self, Republish, RetentionPolicy};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{Delivery, FetchError, QueueConnection, QueueError, QueueMessage, Subscription};
use crate::config::{JetStreamConfig, Retention};

/// Server-side expiry of one pull request.
pub const FETCH_WAIT: Duration = Duration::from_secs(5);

/// Bound on a term or nak round trip.
pub const SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

const ARCHIVE_SUFFIX: &str = "-archive";

pub struct JetStreamMessage {
    inner: jetstream::Message,
}

#[async_trait]
impl QueueMessage for JetStreamMessage {
    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    fn delivery(&self) -> Result<Delivery, QueueError> {
        let info = self
            .inner
            .info()
            .map_err(|e| QueueError::Metadata(e.to_string()))?;
        let published = info.published;
        let enqueued_at = DateTime::from_timestamp(published.unix_timestamp(), published.nanosecond())
            .unwrap_or_else(Utc::now);

        Ok(Delivery {
            sequence: info.stream_sequence,
            num_delivered: u64::try_from(info.delivered).unwrap_or(0),
            enqueued_at,
        })
    }

    async fn confirm(&self, timeout: Duration) -> Result<(), QueueError> {
        bounded("ack", timeout, self.inner.double_ack()).await
    }

    async fn terminate(&self) -> Result<(), QueueError> {
        bounded("term", SIGNAL_TIMEOUT, self.inner.ack_with(AckKind::Term)).await
    }

    async fn redeliver_after(&self, delay: Duration) -> Result<(), QueueError> {
        bounded(
            "nak",
            SIGNAL_TIMEOUT,
            self.inner.ack_with(AckKind::Nak(Some(delay))),
        )
        .await
    }
}

/// Await one signal round trip for at most `timeout`.
async fn bounded<F, E>(signal: &'static str, timeout: Duration, request: F) -> Result<(), QueueError>
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| QueueError::Timeout { signal, timeout })?
        .map_err(|e| QueueError::Signal {
            signal,
            reason: e.to_string(),
        })
}

/// Drain one pull response. An error after some messages arrived ends the
/// batch early; those messages are already delivered and still need their
/// signals.
async fn collect_batch<S, T, E>(messages: S, batch: usize) -> Result<Vec<T>, FetchError>
where
    S: Stream<Item = Result<T, E>>,
    E: Display,
{
    let mut messages = std::pin::pin!(messages);
    let mut pulled = Vec::with_capacity(batch);
    while let Some(message) = messages.next().await {
        match message {
            Ok(message) => pulled.push(message),
            Err(error) if pulled.is_empty() => {
                return Err(FetchError::Transport(error.to_string()));
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    pulled = pulled.len(),
                    "Pull ended early, keeping partial batch"
                );
                break;
            }
        }
    }
    Ok(pulled)
}

pub struct JetStreamSubscription {
    consumer: jetstream::consumer::Consumer<pull::Config>,
}

impl JetStreamSubscription {
    async fn pull(&self, batch: usize) -> Result<Vec<JetStreamMessage>, FetchError> {
        let messages = self
            .consumer
            .batch()
            .max_messages(batch)
            .expires(FETCH_WAIT)
            .messages()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let messages = messages.map(|message| message.map(|inner| JetStreamMessage { inner }));
        collect_batch(messages, batch).await
    }
}

#[async_trait]
impl Subscription for JetStreamSubscription {
    type Message = JetStreamMessage;

    async fn fetch(
        &mut self,
        batch: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<JetStreamMessage>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let pulled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            pulled = self.pull(batch) => pulled?,
        };

        if pulled.is_empty() {
            Err(FetchError::NoMessages)
        } else {
            Ok(pulled)
        }
    }
}

/// Connected JetStream context.
pub struct JetStreamQueue {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl QueueConnection for JetStreamQueue {
    fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }
}

impl JetStreamQueue {
    pub async fn connect(config: &JetStreamConfig) -> Result<Self> {
        let mut options = async_nats::ConnectOptions::new()
            .name(env!("CARGO_PKG_NAME"))
            .event_callback(|event| async move {
                tracing::info!(event = %event, "NATS connection event");
            });
        if !config.username.is_empty() {
            options = options.user_and_password(config.username.clone(), config.password.clone());
        }
        if let Some(root_ca) = &config.root_ca {
            options = options.add_root_certificates(root_ca.clone()).require_tls(true);
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;
        tracing::info!(url = %config.url, "Connected to NATS");

        Ok(Self {
            context: jetstream::new(client.clone()),
            client,
        })
    }

    /// Create or update the stream(s) and the durable consumer.
    pub async fn provision(&self, config: &JetStreamConfig, ack_wait: Duration) -> Result<()> {
        for stream_config in stream_configs(config) {
            self.create_or_update_stream(stream_config).await?;
        }

        let stream = self
            .context
            .get_stream(&config.stream.name)
            .await
            .with_context(|| format!("Failed to look up stream {}", config.stream.name))?;
        stream
            .create_consumer(consumer_config(config, ack_wait))
            .await
            .with_context(|| format!("Failed to create consumer {}", config.consumer.name))?;

        tracing::info!(
            stream = %config.stream.name,
            consumer = %config.consumer.name,
            subject = %config.subject,
            ack_wait = %humantime::format_duration(ack_wait),
            "JetStream consumer provisioned"
        );
        Ok(())
    }

    async fn create_or_update_stream(&self, config: stream::Config) -> Result<()> {
        let name = config.name.clone();
        if self.context.get_stream(&name).await.is_ok() {
            self.context
                .update_stream(&config)
                .await
                .with_context(|| format!("Failed to update stream {}", name))?;
            tracing::info!(stream = %name, "Updated stream");
        } else {
            self.context
                .create_stream(config)
                .await
                .with_context(|| format!("Failed to create stream {}", name))?;
            tracing::info!(stream = %name, "Created stream");
        }
        Ok(())
    }

    /// Bind to the configured durable consumer.
    pub async fn subscribe(&self, config: &JetStreamConfig) -> Result<JetStreamSubscription> {
        let stream = self
            .context
            .get_stream(&config.stream.name)
            .await
            .with_context(|| format!("Failed to look up stream {}", config.stream.name))?;
        let consumer = stream
            .get_consumer::<pull::Config>(&config.consumer.name)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Failed to look up consumer {}", config.consumer.name))?;

        Ok(JetStreamSubscription { consumer })
    }
}

fn retention_policy(retention: Retention) -> RetentionPolicy {
    match retention {
        Retention::Limits => RetentionPolicy::Limits,
        Retention::Interest => RetentionPolicy::Interest,
        Retention::WorkQueue => RetentionPolicy::WorkQueue,
    }
}

/// Stream definitions to provision, archive stream first.
fn stream_configs(config: &JetStreamConfig) -> Vec<stream::Config> {
    let max_bytes = if config.stream.max_size_mb < 0 {
        -1
    } else {
        config.stream.max_size_mb * 1024 * 1024
    };

    let mut main = stream::Config {
        name: config.stream.name.clone(),
        subjects: vec![config.subject.clone()],
        max_age: config.stream.max_age,
        max_bytes,
        max_messages: -1,
        num_replicas: config.stream.replicas,
        retention: retention_policy(config.stream.retention),
        ..Default::default()
    };

    if !config.stream.republish {
        return vec![main];
    }

    let archive_subject = format!("{}{}", config.subject, ARCHIVE_SUFFIX);
    let archive = stream::Config {
        name: format!("{}{}", config.stream.name, ARCHIVE_SUFFIX),
        subjects: vec![archive_subject.clone()],
        retention: RetentionPolicy::Limits,
        ..main.clone()
    };

    main.retention = RetentionPolicy::Interest;
    main.republish = Some(Republish {
        source: config.subject.clone(),
        destination: archive_subject,
        headers_only: false,
    });

    vec![archive, main]
}

fn consumer_config(config: &JetStreamConfig, ack_wait: Duration) -> pull::Config {
    pull::Config {
        durable_name: Some(config.consumer.name.clone()),
        ack_policy: AckPolicy::Explicit,
        ack_wait,
        deliver_policy: DeliverPolicy::New,
        filter_subject: config.subject.clone(),
        max_ack_pending: config.consumer.max_ack_pending,
        max_deliver: -1,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_batch_error_keeps_pulled_messages() {
        let items: Vec<Result<u64, &str>> = vec![Ok(1), Ok(2), Err("connection reset"), Ok(3)];
        let pulled = collect_batch(stream::iter(items), 10).await.unwrap();
        assert_eq!(pulled, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_batch_error_before_any_message() {
        let items: Vec<Result<u64, &str>> = vec![Err("connection reset"), Ok(1)];
        let error = collect_batch(stream::iter(items), 10).await.unwrap_err();
        assert!(matches!(error, FetchError::Transport(reason) if reason == "connection reset"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let items: Vec<Result<u64, &str>> = vec![];
        assert!(collect_batch(stream::iter(items), 10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_signal_times_out() {
        let hung = std::future::pending::<Result<(), &str>>();
        let error = bounded("term", SIGNAL_TIMEOUT, hung).await.unwrap_err();
        assert!(matches!(
            error,
            QueueError::Timeout { signal: "term", timeout } if timeout == SIGNAL_TIMEOUT
        ));
    }

    #[tokio::test]
    async fn test_signal_error_is_reported() {
        let error = bounded("nak", SIGNAL_TIMEOUT, async { Err::<(), _>("no responders") })
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            QueueError::Signal { signal: "nak", reason } if reason == "no responders"
        ));
        assert!(bounded("ack", SIGNAL_TIMEOUT, async { Ok::<(), &str>(()) }).await.is_ok());
    }

    #[test]
    fn test_plain_stream() {
        let mut config = JetStreamConfig::default();
        config.stream.max_size_mb = 512;
        config.stream.max_age = Duration::from_secs(3600);

        let streams = stream_configs(&config);
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].name, "bucket-replicator-stream");
        assert_eq!(streams[0].subjects, vec!["bucket-replicator-events".to_string()]);
        assert_eq!(streams[0].max_bytes, 512 * 1024 * 1024);
        assert_eq!(streams[0].max_age, Duration::from_secs(3600));
        assert_eq!(streams[0].retention, RetentionPolicy::Limits);
        assert!(streams[0].republish.is_none());
    }

    #[test]
    fn test_unlimited_size() {
        let streams = stream_configs(&JetStreamConfig::default());
        assert_eq!(streams[0].max_bytes, -1);
    }

    #[test]
    fn test_republish_adds_archive_stream() {
        let mut config = JetStreamConfig::default();
        config.stream.republish = true;

        let streams = stream_configs(&config);
        assert_eq!(streams.len(), 2);

        let (archive, main) = (&streams[0], &streams[1]);
        assert_eq!(archive.name, "bucket-replicator-stream-archive");
        assert_eq!(
            archive.subjects,
            vec!["bucket-replicator-events-archive".to_string()]
        );
        assert_eq!(archive.retention, RetentionPolicy::Limits);
        assert!(archive.republish.is_none());

        assert_eq!(main.retention, RetentionPolicy::Interest);
        let republish = main.republish.as_ref().unwrap();
        assert_eq!(republish.source, "bucket-replicator-events");
        assert_eq!(republish.destination, "bucket-replicator-events-archive");
    }

    #[test]
    fn test_consumer_config() {
        let config = JetStreamConfig::default();
        let consumer = consumer_config(&config, Duration::from_secs(1800));

        assert_eq!(consumer.durable_name.as_deref(), Some("bucket-replicator-consumer"));
        assert_eq!(consumer.ack_policy, AckPolicy::Explicit);
        assert_eq!(consumer.ack_wait, Duration::from_secs(1800));
        assert_eq!(consumer.deliver_policy, DeliverPolicy::New);
        assert_eq!(consumer.filter_subject, "bucket-replicator-events");
        assert_eq!(consumer.max_ack_pending, 1000);
        assert_eq!(consumer.max_deliver, -1);
    }
}
