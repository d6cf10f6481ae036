/*
 * This file is part of lsstor.
 *
 * Copyright (C) 2025 lsstor contributors
 *
 * lsstor is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lsstor is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lsstor. If not, see <https://www.gnu.org/licenses/>.
 */

use std::env;
use std::io;

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "LSSTOR_LOG";

/// Filter used when `LSSTOR_LOG` is unset: each `-v` raises the level one
/// step from `warn`.
pub fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Diagnostics go to stderr so they never
/// mix with the listing on stdout.
pub fn init_logging(verbosity: u8) {
    let log_level = env::var(LOG_ENV).unwrap_or_else(|_| default_level(verbosity).to_string());
    let result = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(io::stderr)
        .with_env_filter(&log_level)
        .try_init();
    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
    }
}
