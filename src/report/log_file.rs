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

//! JSON record file
//!
//! The file is overwritten with the latest record every tick so other tools
//! can read the current state. `-` prints to stdout instead.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use fs_core::constants::report as report_const;
use fs_core::{Report, Reporter};
use fs_error::{FanspeedError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    File(PathBuf),
}

impl LogTarget {
    /// Parse `-L`; blank values and null devices disable the sink
    pub fn parse(arg: &str) -> Option<Self> {
        let arg = arg.trim();
        if arg.is_empty() {
            return None;
        }
        let lower = arg.to_ascii_lowercase();
        if report_const::NULL_LOG_TARGETS.contains(&lower.as_str()) {
            return None;
        }
        if arg == "-" {
            Some(LogTarget::Stdout)
        } else {
            Some(LogTarget::File(PathBuf::from(arg)))
        }
    }
}

/// Writes each record to a file or stdout
#[derive(Debug, Clone)]
pub struct LogFileReporter {
    target: LogTarget,
}

impl LogFileReporter {
    pub fn new(target: LogTarget) -> Self {
        Self { target }
    }

    pub fn from_arg(arg: &str) -> Option<Self> {
        LogTarget::parse(arg).map(Self::new)
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }
}

impl Reporter for LogFileReporter {
    fn name(&self) -> &str {
        "log"
    }

    fn report(&mut self, report: &Report) -> Result<()> {
        let json = report.to_json();
        match &self.target {
            LogTarget::Stdout => {
                println!("{}", json);
                Ok(())
            }
            LogTarget::File(path) => {
                debug!(path = %path.display(), "Writing record");
                fs::write(path, json).map_err(|source| FanspeedError::FileWrite {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}
