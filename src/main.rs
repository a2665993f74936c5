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

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

use fanspeed::cli::Cli;
use fanspeed::{daemon, logging};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let sink = logging::init(cli.verbose);
    debug!("Logging to {}", sink.describe());

    let result = cli.into_settings().and_then(daemon::run);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            if sink == logging::LogSink::Journald {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}
