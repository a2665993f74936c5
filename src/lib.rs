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

//! fanspeed - temperature driven PWM fan control for the Raspberry Pi
//!
//! The controller itself lives in `fs-core`; this crate adds the command
//! line, process bookkeeping and the reporting sinks around it.

pub mod cli;
pub mod daemon;
pub mod identity;
pub mod logging;
pub mod pidfile;
pub mod report;
pub mod shutdown;
