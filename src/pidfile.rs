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

//! PID file bookkeeping
//!
//! A live PID in an existing file refuses startup; a dead one is replaced.
//! The file is removed when the guard drops.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use fs_error::{FanspeedError, Result};

/// Owned PID file, removed on drop
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

fn pid_error(path: &Path, reason: impl std::fmt::Display) -> FanspeedError {
    FanspeedError::PidFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Whether a process with this PID exists
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 only checks whether the process exists, no signal is delivered.
    unsafe { libc::kill(pid, 0) == 0 }
}

impl PidFile {
    /// Write the current PID to `path`
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if path.exists() {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(old_pid) = content.trim().parse::<i32>() {
                    if old_pid != std::process::id() as i32 && process_alive(old_pid) {
                        return Err(FanspeedError::AlreadyRunning(old_pid));
                    }
                }
            }
            debug!(path = %path.display(), "Removing stale PID file");
            fs::remove_file(&path).map_err(|e| pid_error(&path, e))?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&path)
            .map_err(|e| pid_error(&path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| pid_error(&path, e))?;
        file.sync_all().map_err(|e| pid_error(&path, e))?;

        debug!(path = %path.display(), "PID file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "Failed to remove PID file: {}", e);
            } else {
                debug!(path = %self.path.display(), "PID file removed");
            }
        }
    }
}
