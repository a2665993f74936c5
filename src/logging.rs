/*
 * This file is part of fanspeed.
 *
 * Copyright (C) 2025 fanspeed contributors
 *
 * fanspeed is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fanspeed is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fanspeed. If not, see <https://www.gnu.org/licenses/>.
 */

//! Tracing setup
//!
//! Logs go to the systemd journal when its socket exists and to stderr
//! otherwise; stdout is left for the JSON record (`-L -`), the speed table
//! and measurement results.

use std::path::Path;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "FANSPEED_LOG";

const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

/// Where log records end up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Journald,
    Stderr,
}

impl LogSink {
    pub fn describe(&self) -> &'static str {
        match self {
            LogSink::Journald => "systemd journal",
            LogSink::Stderr => "stderr",
        }
    }
}

/// Filter directive: `debug` when verbose, else `FANSPEED_LOG`, else `info`
pub fn log_filter(verbose: bool) -> String {
    if verbose {
        return "debug".to_string();
    }
    std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

fn init_stderr(filter: &str) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Install the global subscriber; call once at startup
pub fn init(verbose: bool) -> LogSink {
    let filter = log_filter(verbose);

    if !Path::new(JOURNALD_SOCKET).exists() {
        init_stderr(&filter);
        return LogSink::Stderr;
    }

    match tracing_journald::layer() {
        Ok(journald_layer) => {
            use tracing_subscriber::prelude::*;
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(tracing_subscriber::EnvFilter::new(&filter))
                .init();
            LogSink::Journald
        }
        Err(e) => {
            eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
            init_stderr(&filter);
            LogSink::Stderr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_verbose_forces_debug() {
        std::env::set_var(LOG_ENV, "warn");
        assert_eq!(log_filter(true), "debug");
        std::env::remove_var(LOG_ENV);
    }

    #[test]
    #[serial]
    fn test_env_filter_used() {
        std::env::set_var(LOG_ENV, "fanspeed=trace");
        assert_eq!(log_filter(false), "fanspeed=trace");
        std::env::remove_var(LOG_ENV);
    }

    #[test]
    #[serial]
    fn test_default_is_info() {
        std::env::remove_var(LOG_ENV);
        assert_eq!(log_filter(false), "info");
    }
}
