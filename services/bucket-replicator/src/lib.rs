// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bucket Replicator Library
//!
//! Replicates objects between two object stores in response to bucket
//! change notifications pulled from a JetStream queue: created objects are
//! copied from the source bucket to the destination bucket, removed objects
//! are deleted from the destination. Notifications are delivered at least
//! once and every one ends in exactly one queue signal.
//!
//! # Modules
//!
//! - [`ack`] - Acknowledgment decisions, redelivery backoff and signal retries
//! - [`config`] - TOML configuration, validation and redaction
//! - [`consumer`] - Pull/dispatch loop with per-message deadlines and backpressure
//! - [`exclusion`] - Key patterns that are never replicated
//! - [`format`] - Human-readable sizes and transfer rates for logs
//! - [`health`] - Liveness and readiness checks
//! - [`metrics`] - Prometheus metrics
//! - [`queue`] - Queue capability, JetStream and in-memory bindings
//! - [`router`] - Notification validation and copy/remove dispatch
//! - [`server`] - HTTP plumbing for the health and metrics endpoints
//! - [`shutdown`] - Multi-phase graceful drain and signal handling
//! - [`transfer`] - Copy and remove operations

pub mod ack;
pub mod config;
pub mod consumer;
pub mod exclusion;
pub mod format;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod transfer;
