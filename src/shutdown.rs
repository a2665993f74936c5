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

//! Signal driven shutdown
//!
//! The first SIGINT/SIGTERM wakes the control loop so it can commit the exit
//! duty cycle and clean up. A second signal exits immediately with 130.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use fs_error::{FanspeedError, Result};

/// Exit status after a repeated signal
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Default)]
struct State {
    signals: Mutex<u32>,
    wake: Condvar,
}

/// Shared shutdown request counter
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    state: Arc<State>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTERM here; only one handler per process
    pub fn install(&self) -> Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            let count = signal.raise();
            if count > 1 {
                warn!("Second signal received, exiting immediately");
                std::process::exit(FORCED_EXIT_CODE);
            }
            info!("Signal received, shutting down");
        })
        .map_err(|e| FanspeedError::generic(format!("Failed to set signal handler: {}", e)))
    }

    /// Record one request and wake waiters; returns the total so far
    pub fn raise(&self) -> u32 {
        let mut signals = self.state.signals.lock();
        *signals += 1;
        self.state.wake.notify_all();
        *signals
    }

    pub fn is_requested(&self) -> bool {
        *self.state.signals.lock() > 0
    }

    /// Sleep up to `timeout`; `true` as soon as shutdown is requested
    ///
    /// A timeout too far out to express as a deadline waits for the signal only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut signals = self.state.signals.lock();
        while *signals == 0 {
            match deadline {
                Some(deadline) => {
                    if self.state.wake.wait_until(&mut signals, deadline).timed_out() {
                        break;
                    }
                }
                None => self.state.wake.wait(&mut signals),
            }
        }
        *signals > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_without_signal() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!signal.is_requested());
    }

    #[test]
    fn test_raise_wakes_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let woke = waiter.wait_timeout(Duration::from_secs(30));
            (woke, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(signal.raise(), 1);

        let (woke, elapsed) = handle.join().unwrap();
        assert!(woke);
        assert!(elapsed < Duration::from_secs(30));
    }

    #[test]
    fn test_unbounded_timeout_waits_for_signal() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::MAX));
        std::thread::sleep(Duration::from_millis(20));
        signal.raise();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_already_requested_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.raise();
        assert_eq!(signal.raise(), 2);
        assert!(signal.wait_timeout(Duration::from_secs(30)));
    }
}
