// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the replicator
//!
//! Exports metrics for monitoring replication including:
//! - Messages processed by outcome (success, skipped, failed, terminated)
//! - Copy duration, throughput, size, delivery count and queue wait
//! - Delete duration, delivery count and queue wait
//!
//! The registry is owned by a [`Metrics`] handle created once at startup and
//! shared as `Arc<Metrics>`; nothing here is global.

use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{CounterVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use regex::Regex;
use strum::{AsRefStr, Display};

const SUBSYSTEM: &str = "replicator";

const PROCESSED_LABELS: [&str; 5] = ["state", "error", "code", "event", "event_type"];

const DELIVERED_BUCKETS: [f64; 8] = [1.0, 2.0, 3.0, 5.0, 10.0, 20.0, 30.0, 40.0];

const QUEUE_DURATION_BUCKETS: [f64; 13] = [
    10.0, 30.0, 60.0, 120.0, 240.0, 300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 21_600.0,
    43_200.0,
];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to create metric: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("failed to compile error scrubber: {0}")]
    Regex(#[from] regex::Error),
}

/// Final state of a processed record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProcessedState {
    Success,
    Skipped,
    Failed,
    Terminated,
    /// The queue never received the signal
    SignalFailed,
}

/// Label values for one processed-message count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessedLabels<'a> {
    pub error: &'a str,
    pub code: &'a str,
    pub event: &'a str,
    pub event_type: &'a str,
}

/// A completed copy.
#[derive(Clone, Copy, Debug)]
pub struct CopyObservation {
    pub elapsed: Duration,
    pub bytes: u64,
    pub num_delivered: u64,
    pub queue_wait: Duration,
}

/// A completed delete.
#[derive(Clone, Copy, Debug)]
pub struct DeleteObservation {
    pub elapsed: Duration,
    pub num_delivered: u64,
    pub queue_wait: Duration,
}

pub struct Metrics {
    registry: Registry,
    messages_processed: CounterVec,
    transfer_duration: Histogram,
    transfer_rate: Histogram,
    transfer_size: Histogram,
    transfer_delivered: Histogram,
    transfer_queue_duration: Histogram,
    delete_duration: Histogram,
    delete_delivered: Histogram,
    delete_queue_duration: Histogram,
    scrubber: ErrorScrubber,
}

fn histogram(name: &str, help: &str, buckets: &[f64]) -> Result<Histogram, prometheus::Error> {
    Histogram::with_opts(
        HistogramOpts::new(name, help)
            .subsystem(SUBSYSTEM)
            .buckets(buckets.to_vec()),
    )
}

impl Metrics {
    /// Create every metric and register it with a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let messages_processed = CounterVec::new(
            Opts::new("messages_processed_count", "count of messages processed by state")
                .subsystem(SUBSYSTEM),
            &PROCESSED_LABELS,
        )?;

        let transfer_duration = histogram(
            "messages_transfer_duration",
            "a histogram of file transfer duration in seconds",
            &[3.0, 5.0, 10.0, 30.0, 60.0, 120.0, 240.0, 300.0, 600.0, 900.0, 1800.0, 3600.0],
        )?;
        let transfer_rate = histogram(
            "messages_transfer_rate",
            "a histogram of file transfer speed in kbytes/second",
            &[
                500.0, 1_000.0, 5_000.0, 10_000.0, 12_000.0, 15_000.0, 20_000.0, 25_000.0,
                30_000.0, 50_000.0, 70_000.0,
            ],
        )?;
        let transfer_size = histogram(
            "messages_transfer_size",
            "a histogram of file transfer size in kbytes",
            &[
                1_000.0,
                10_000.0,
                50_000.0,
                100_000.0,
                500_000.0,
                1_000_000.0,
                5_000_000.0,
                10_000_000.0,
                20_000_000.0,
                50_000_000.0,
            ],
        )?;
        let transfer_delivered = histogram(
            "messages_transfer_delivered_count",
            "a histogram of the number of times a message was delivered before it was successful",
            &DELIVERED_BUCKETS,
        )?;
        let transfer_queue_duration = histogram(
            "messages_transfer_queue_duration",
            "a histogram of the time a message spent waiting and retrying in the queue in seconds",
            &QUEUE_DURATION_BUCKETS,
        )?;
        let delete_duration = histogram(
            "messages_delete_duration",
            "a histogram of file delete duration in seconds",
            &[1.0, 2.0, 3.0, 5.0, 10.0, 30.0, 60.0],
        )?;
        let delete_delivered = histogram(
            "messages_delete_delivered_count",
            "a histogram of the number of times a delete message was delivered before it was successful",
            &DELIVERED_BUCKETS,
        )?;
        let delete_queue_duration = histogram(
            "messages_delete_queue_duration",
            "a histogram of the time a delete message spent waiting and retrying in the queue in seconds",
            &QUEUE_DURATION_BUCKETS,
        )?;

        registry.register(Box::new(messages_processed.clone()))?;
        for metric in [
            &transfer_duration,
            &transfer_rate,
            &transfer_size,
            &transfer_delivered,
            &transfer_queue_duration,
            &delete_duration,
            &delete_delivered,
            &delete_queue_duration,
        ] {
            registry.register(Box::new(metric.clone()))?;
        }

        Ok(Self {
            registry,
            messages_processed,
            transfer_duration,
            transfer_rate,
            transfer_size,
            transfer_delivered,
            transfer_queue_duration,
            delete_duration,
            delete_delivered,
            delete_queue_duration,
            scrubber: ErrorScrubber::new()?,
        })
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }

    /// Count one processed record. The error label is scrubbed first.
    pub fn record_processed(&self, state: ProcessedState, labels: &ProcessedLabels<'_>) {
        let error = self.scrubber.scrub(labels.error);
        self.messages_processed
            .with_label_values(&[
                state.as_ref(),
                error.as_str(),
                labels.code,
                labels.event,
                labels.event_type,
            ])
            .inc();
    }

    /// Total processed records in `state`, across all other labels.
    pub fn processed_total(&self, state: ProcessedState) -> f64 {
        self.messages_processed
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .filter(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == "state" && pair.get_value() == state.as_ref())
            })
            .map(|metric| metric.get_counter().get_value())
            .sum()
    }

    pub fn observe_copy(&self, copy: &CopyObservation) {
        let seconds = copy.elapsed.as_secs_f64();
        self.transfer_duration.observe(seconds);
        if seconds > 0.0 {
            self.transfer_rate.observe(copy.bytes as f64 / seconds / 1000.0);
        }
        self.transfer_size.observe(copy.bytes as f64 / 1000.0);
        self.observe_copy_skipped(copy.num_delivered, copy.queue_wait);
    }

    /// Delivery count and queue wait of a copy that was skipped.
    pub fn observe_copy_skipped(&self, num_delivered: u64, queue_wait: Duration) {
        self.transfer_delivered.observe(num_delivered as f64);
        self.transfer_queue_duration
            .observe(queue_wait.as_secs_f64());
    }

    pub fn observe_delete(&self, delete: &DeleteObservation) {
        self.delete_duration.observe(delete.elapsed.as_secs_f64());
        self.observe_delete_skipped(delete.num_delivered, delete.queue_wait);
    }

    /// Delivery count and queue wait of a delete that was skipped.
    pub fn observe_delete_skipped(&self, num_delivered: u64, queue_wait: Duration) {
        self.delete_delivered.observe(num_delivered as f64);
        self.delete_queue_duration.observe(queue_wait.as_secs_f64());
    }

    pub fn transfer_count(&self) -> u64 {
        self.transfer_duration.get_sample_count()
    }

    pub fn delete_count(&self) -> u64 {
        self.delete_duration.get_sample_count()
    }
}

/// Strips high-cardinality detail (URLs, addresses, incident ids) from
/// error strings before they become label values.
struct ErrorScrubber {
    url: Regex,
    ip: Regex,
    incident: Regex,
    line_break: Regex,
}

impl ErrorScrubber {
    const REQUEST_PREFIXES: [&'static str; 4] = ["Post", "Put", "Head", "Get"];

    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url: Regex::new(r#"("?https?://[\w.\-/?=&:"_]+)"#)?,
            ip: Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(:\d{1,5})?)")?,
            incident: Regex::new(r"(incident id )(\w+-\w+)")?,
            line_break: Regex::new(r"\n\s?")?,
        })
    }

    fn scrub(&self, error: &str) -> String {
        let mut error = error.to_string();

        if Self::REQUEST_PREFIXES
            .iter()
            .any(|prefix| error.starts_with(prefix))
        {
            error = self.url.replace_all(&error, "-").into_owned();
            error = self.ip.replace_all(&error, "-").into_owned();
        }

        if error.contains("incident id") {
            error = self.incident.replace_all(&error, "${1}-").into_owned();
            error = self.line_break.replace_all(&error, "").into_owned();
            // embedded messages arrive with their escapes intact
            if let Ok(unescaped) = serde_json::from_str::<String>(&format!("\"{}\"", error)) {
                error = unescaped;
            }
        }

        error
    }
}
