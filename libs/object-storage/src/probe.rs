// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Background availability probe.

use std::sync::Arc;
use std::time::Duration;

use object_store::path::Path;
use tokio_util::sync::CancellationToken;

use crate::{ObjectStorage, ObjectStoreClient};

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Key that is HEADed to see whether the server answers at all.
const PROBE_KEY: &str = ".replicator-availability-probe";

impl ObjectStoreClient {
    /// Returns true when the server answered the probe request.
    ///
    /// A refusal (missing key, denied, unauthenticated) still means the
    /// server is up.
    pub async fn probe(&self) -> bool {
        match self.store().head(&Path::from(PROBE_KEY)).await {
            Ok(_)
            | Err(object_store::Error::NotFound { .. })
            | Err(object_store::Error::PermissionDenied { .. })
            | Err(object_store::Error::Unauthenticated { .. }) => true,
            Err(error) => {
                tracing::debug!(storage = %self.name(), error = %error, "Availability probe failed");
                false
            }
        }
    }
}

/// Probe `client` every `interval` until `cancel` fires, keeping its
/// offline flag current. Only transitions are logged.
pub async fn watch_availability(
    client: Arc<ObjectStoreClient>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let online = tokio::select! {
            _ = cancel.cancelled() => break,
            online = client.probe() => online,
        };

        let was_offline = client.set_offline(!online);
        if was_offline && online {
            tracing::info!(
                storage = %client.name(),
                endpoint = %client.endpoint(),
                "Storage backend is back online"
            );
        } else if !was_offline && !online {
            tracing::warn!(
                storage = %client.name(),
                endpoint = %client.endpoint(),
                "Storage backend is offline"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(storage = %client.name(), "Availability probe stopped");
}
