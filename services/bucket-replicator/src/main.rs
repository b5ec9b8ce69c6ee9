// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bucket Replicator Service
//!
//! Pulls bucket change notifications from JetStream and mirrors each change
//! from the source bucket to the destination bucket:
//!
//! - Created objects are copied, removed objects are deleted
//! - Failed transfers are redelivered with exponential backoff
//! - Health (`/live`, `/ready`) and Prometheus (`/metrics`) endpoints
//! - SIGINT/SIGTERM drain gracefully; a second signal exits immediately

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use object_storage::{DEFAULT_PROBE_INTERVAL, ObjectStorage, ObjectStoreClient, watch_availability};
use tracing_subscriber::EnvFilter;

use bucket_replicator::ack::Acknowledger;
use bucket_replicator::config::Config;
use bucket_replicator::consumer::ConsumerLoop;
use bucket_replicator::health::{self, CHECK_INTERVAL, HealthCheck, Readiness, watch_readiness};
use bucket_replicator::metrics::Metrics;
use bucket_replicator::queue::jetstream::JetStreamQueue;
use bucket_replicator::router::Router;
use bucket_replicator::server;
use bucket_replicator::shutdown::{ShutdownCoordinator, TerminationSignals};
use bucket_replicator::transfer::Replicator;

#[derive(Parser)]
#[command(name = "bucket-replicator")]
#[command(about = "Replicate bucket changes between object stores", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml", env = "REPLICATOR_CONFIG")]
    config: PathBuf,

    /// Log level; overrides `log_level` from the config file
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,bucket_replicator={level},object_storage={level},bucket_notification={level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn ensure_bucket(client: &ObjectStoreClient) -> Result<()> {
    let exists = client
        .bucket_exists(client.bucket())
        .await
        .with_context(|| format!("Failed to look up {} bucket {}", client.name(), client.bucket()))?;
    ensure!(
        exists,
        "{} bucket {} does not exist at {}",
        client.name(),
        client.bucket(),
        client.endpoint()
    );
    tracing::info!(
        storage = client.name(),
        bucket = client.bucket(),
        endpoint = %client.endpoint(),
        "Bucket found"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_file(&cli.config).await?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_tracing(&config.log_level);
    print_version();

    let redacted =
        serde_json::to_string(&config.redacted()).context("Failed to serialize configuration")?;
    tracing::info!(config = %redacted, "Loaded configuration");

    let metrics = Arc::new(Metrics::new().context("Failed to create metrics")?);

    let source = Arc::new(config.source.client()?);
    let destination = Arc::new(config.destination.storage.client()?);
    ensure_bucket(&source).await?;
    ensure_bucket(&destination).await?;

    let queue = Arc::new(JetStreamQueue::connect(&config.jetstream).await?);
    if config.jetstream.provisioning_disabled {
        tracing::info!("JetStream provisioning disabled, using existing stream and consumer");
    } else {
        queue
            .provision(&config.jetstream, config.msg_timeout)
            .await?;
    }
    let mut subscription = queue.subscribe(&config.jetstream).await?;

    let (mut coordinator, consumer_done) =
        ShutdownCoordinator::new(config.shutdown_wait, config.shutdown_wait_forced);
    let pull = coordinator.pull_token();
    let transfers = coordinator.transfer_token();

    for client in [&source, &destination] {
        coordinator.tracker().spawn(watch_availability(
            Arc::clone(client),
            DEFAULT_PROBE_INTERVAL,
            transfers.clone(),
        ));
    }

    if config.health_check.disabled {
        tracing::info!("Health check server disabled");
    } else {
        let readiness = Readiness {
            source: source.clone(),
            destination: destination.clone(),
            queue: queue.clone(),
        };
        let ready = Arc::new(HealthCheck::new("ready", readiness.evaluate()));
        let live = Arc::new(HealthCheck::liveness());
        coordinator.tracker().spawn(watch_readiness(
            ready.clone(),
            readiness,
            CHECK_INTERVAL,
            transfers.clone(),
        ));

        let listener = server::bind("health", config.health_check.port).await?;
        let app = health::router(live, ready);
        coordinator.spawn_server("health", move |token| {
            server::serve("health", listener, app, token)
        });
    }

    let listener = server::bind("metrics", config.metrics.port).await?;
    let app = server::metrics_router(metrics.clone());
    coordinator.spawn_server("metrics", move |token| {
        server::serve("metrics", listener, app, token)
    });

    let replicator = Replicator::new(source, destination, &config, metrics)
        .context("Failed to compile exclude path patterns")?;
    let router = Router::new(
        replicator,
        Acknowledger::new(config.max_deliveries_before_term),
        config.skip_event_bucket_validation,
    );
    let consumer = ConsumerLoop::new(router, config.jetstream.batch_size, config.transfer_timeout());
    coordinator.tracker().spawn(async move {
        consumer
            .run(&mut subscription, &pull, &transfers, consumer_done)
            .await;
    });

    let mut signals =
        TerminationSignals::register().context("Failed to register signal handlers")?;
    if !config.shutdown_wait.is_zero() {
        tracing::info!(
            shutdown_wait = %humantime::format_duration(config.shutdown_wait),
            "Shutdown wait configured"
        );
    }
    tracing::info!("Startup complete");

    let signal = signals.recv().await;
    signals.exit_on_next();
    coordinator.drain(signal).await;

    Ok(())
}
