// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Human-readable sizes and rates for log lines (decimal units).

use std::time::Duration;

const UNITS: [(f64, &str); 5] = [
    (1e12, "TB"),
    (1e9, "GB"),
    (1e6, "MB"),
    (1e3, "KB"),
    (1.0, "B"),
];

fn scaled(value: f64, suffix: &str) -> String {
    UNITS
        .iter()
        .find(|(base, _)| value / base >= 1.0)
        .map(|(base, unit)| format!("{:.2}{}{}", value / base, unit, suffix))
        .unwrap_or_else(|| "-".to_string())
}

/// `1024` -> `1.02KB`
pub fn size(bytes: u64) -> String {
    scaled(bytes as f64, "")
}

/// Average transfer rate, e.g. `3.40MB/s`.
pub fn rate(bytes: u64, elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return "-".to_string();
    }
    scaled(bytes as f64 / seconds, "/s")
}
