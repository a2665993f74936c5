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

//! External command sink
//!
//! The template is split like a POSIX shell would split it, `{message}` is
//! substituted inside each token and the program runs directly, without a
//! shell. After too many consecutive failures the sink stops running.

use std::process::Command;

use tracing::{debug, error};

use fs_core::constants::report as report_const;
use fs_core::{Report, Reporter};
use fs_error::{FanspeedError, Result};

#[derive(Debug, Clone)]
pub struct CommandReporter {
    template: Vec<String>,
    consecutive_errors: u32,
    disabled: bool,
}

impl CommandReporter {
    pub fn new(template: &str) -> Result<Self> {
        let tokens = shlex::split(template.trim()).ok_or_else(|| {
            FanspeedError::invalid_config("cmd", format!("cannot parse command line: {}", template))
        })?;
        if tokens.is_empty() {
            return Err(FanspeedError::invalid_config("cmd", "command is empty"));
        }
        Ok(Self {
            template: tokens,
            consecutive_errors: 0,
            disabled: false,
        })
    }

    /// Argument vector with the record substituted
    pub fn render(&self, message: &str) -> Vec<String> {
        self.template
            .iter()
            .map(|token| token.replace(report_const::MESSAGE_PLACEHOLDER, message))
            .collect()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    fn execute(&self, argv: &[String]) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| FanspeedError::Command("empty command".into()))?;
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| FanspeedError::Command(format!("{}: {}", program, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(FanspeedError::Command(format!(
                "{} exited with {}",
                program, status
            )))
        }
    }
}

impl Reporter for CommandReporter {
    fn name(&self) -> &str {
        "command"
    }

    fn report(&mut self, report: &Report) -> Result<()> {
        if self.disabled {
            return Ok(());
        }

        let argv = self.render(&report.to_json());
        debug!(command = %argv.join(" "), "Executing command");

        match self.execute(&argv) {
            Ok(()) => {
                self.consecutive_errors = 0;
                Ok(())
            }
            Err(e) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > report_const::MAX_COMMAND_ERRORS {
                    error!(
                        errors = self.consecutive_errors,
                        "Stopping command after repeated failures: {}",
                        self.template.join(" ")
                    );
                    self.disabled = true;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record() -> Report {
        Report::at(52.0, 64.0, Some(1800.0), 1_700_000_000)
    }

    #[test]
    fn test_render_substitutes_message() {
        let sink = CommandReporter::new(
            "/usr/bin/mosquitto_pub -r -t 'home/pi/RPi.fanspeed' -m '{message}'",
        )
        .unwrap();
        let argv = sink.render("{\"a\":1}");
        assert_eq!(
            argv,
            vec![
                "/usr/bin/mosquitto_pub",
                "-r",
                "-t",
                "home/pi/RPi.fanspeed",
                "-m",
                "{\"a\":1}",
            ]
        );
    }

    #[test]
    fn test_rejects_unbalanced_quotes() {
        assert!(CommandReporter::new("echo 'oops").is_err());
        assert!(CommandReporter::new("   ").is_err());
    }

    #[test]
    fn test_runs_program_with_record() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.json");
        let template = format!("sh -c 'printf %s \"$0\" > {}' '{{message}}'", out.display());
        let mut sink = CommandReporter::new(&template).unwrap();

        sink.report(&record()).unwrap();

        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(written, record().to_json());
    }

    #[test]
    fn test_failures_disable_after_limit() {
        let mut sink = CommandReporter::new("false").unwrap();
        for _ in 0..10 {
            assert!(sink.report(&record()).is_err());
            assert!(!sink.is_disabled());
        }
        assert!(sink.report(&record()).is_err());
        assert!(sink.is_disabled());
        // disabled sinks are silent
        assert!(sink.report(&record()).is_ok());
    }

    #[test]
    fn test_success_resets_error_count() {
        let mut sink = CommandReporter::new("sh -c 'exit 1'").unwrap();
        sink.report(&record()).unwrap_err();
        sink.report(&record()).unwrap_err();
        assert_eq!(sink.consecutive_errors(), 2);

        sink.template = vec!["true".into()];
        sink.report(&record()).unwrap();
        assert_eq!(sink.consecutive_errors(), 0);
    }

    #[test]
    fn test_missing_program_is_error() {
        let mut sink = CommandReporter::new("/nonexistent/fanspeed-hook {message}").unwrap();
        assert!(matches!(
            sink.report(&record()),
            Err(FanspeedError::Command(_))
        ));
    }
}
