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

//! Reporting sinks
//!
//! Every sink receives the same [`fs_core::Report`] record through the
//! [`fs_core::Reporter`] trait. Failures are returned to the control loop,
//! which logs them per sink and carries on.

mod command;
mod log_file;
mod mqtt;

pub use command::CommandReporter;
pub use log_file::{LogFileReporter, LogTarget};
pub use mqtt::{
    connack_message, discovery_payload, render_topic, MqttPublisher, MqttSession, MqttSettings,
    SensorEntity, Topics, UpdateThrottle, SENSOR_ENTITIES,
};
