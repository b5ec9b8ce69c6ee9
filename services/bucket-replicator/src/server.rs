// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! HTTP plumbing for the health and metrics endpoints.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

/// Bind `port` on all interfaces.
pub async fn bind(name: &str, port: u16) -> Result<TcpListener> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {} server to {}", name, address))?;
    tracing::info!(
        server = name,
        address = %listener.local_addr().unwrap_or(address),
        "Started HTTP server"
    );
    Ok(listener)
}

/// Serve `app` until `shutdown` fires.
pub async fn serve(name: &'static str, listener: TcpListener, app: Router, shutdown: CancellationToken) {
    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(server = name, error = %error, "HTTP server error");
    }
}

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new().route(
        "/metrics",
        get(move || async move { ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], metrics.gather()) }),
    )
}
