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

//! MQTT state publisher with Home Assistant discovery
//!
//! # Topics
//!
//! State goes to `--mqtttopic` rendered with `{device_name}` and `{entity}`:
//! - `.../RPi.fanspeed/status`: `"1"` while connected, `"0"` as last will
//! - `.../RPi.fanspeed/json`: the report record
//!
//! With a discovery prefix, three sensor configs are announced on every
//! connect under `{prefix}/sensor/{device_name}_{slug}/config`.
//!
//! # Connection
//!
//! The rumqttc event loop runs on a small tokio runtime owned by the session.
//! Reconnects back off from 5 to 60 seconds. State publishes are throttled
//! to the update interval, the first one 5 seconds after connecting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS,
};
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fs_core::constants::mqtt as mqtt_const;
use fs_core::{Report, Reporter};
use fs_error::{FanspeedError, Result};

use crate::identity::{unique_id, Identity};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Broker and topic settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: String,
    /// Defaults to the host name
    pub device_name: Option<String>,
    pub topic: String,
    /// Empty disables discovery
    pub discovery_prefix: String,
    pub update_interval: Duration,
}

impl MqttSettings {
    fn has_credentials(&self) -> bool {
        matches!(&self.user, Some(user) if !user.is_empty()) && !self.password.is_empty()
    }

    /// `user@host:port`, or `anonymous@host:port` without full credentials
    pub fn server(&self) -> String {
        let account = match &self.user {
            Some(user) if self.has_credentials() => user.as_str(),
            _ => "anonymous",
        };
        format!("{}@{}:{}", account, self.host, self.port)
    }
}

/// Substitute the placeholders of a topic template
pub fn render_topic(template: &str, device_name: &str, entity: &str, prefix: &str) -> String {
    template
        .replace("{auto_discovery_prefix}", prefix)
        .replace("{device_name}", device_name)
        .replace("{entity}", entity)
}

/// A sensor announced through discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorEntity {
    pub entity: &'static str,
    /// Suffix of the discovery topic
    pub slug: &'static str,
    pub unit: &'static str,
    /// Field of the JSON record
    pub value_name: &'static str,
}

pub const SENSOR_ENTITIES: [SensorEntity; 3] = [
    SensorEntity {
        entity: "thermal_zone0",
        slug: "thermal-zone0",
        unit: "\u{b0}C",
        value_name: "temperature",
    },
    SensorEntity {
        entity: "duty_cycle",
        slug: "duty-cycle",
        unit: "%",
        value_name: "duty_cycle",
    },
    SensorEntity {
        entity: "rpm",
        slug: "rpm",
        unit: "rpm",
        value_name: "rpm",
    },
];

/// Rendered topics of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub status: String,
    pub json: String,
    pub discovery_prefix: String,
    pub device_name: String,
}

impl Topics {
    pub fn new(template: &str, device_name: &str, discovery_prefix: &str) -> Self {
        Self {
            status: render_topic(template, device_name, mqtt_const::STATUS_ENTITY, discovery_prefix),
            json: render_topic(template, device_name, mqtt_const::JSON_ENTITY, discovery_prefix),
            discovery_prefix: discovery_prefix.to_string(),
            device_name: device_name.to_string(),
        }
    }

    pub fn discovery(&self, sensor: &SensorEntity) -> String {
        format!(
            "{}/sensor/{}_{}/config",
            self.discovery_prefix, self.device_name, sensor.slug
        )
    }
}

/// Home Assistant sensor config for one entity
pub fn discovery_payload(topics: &Topics, sensor: &SensorEntity, macs: &[String]) -> String {
    let uid = unique_id(&topics.device_name, sensor.entity);
    let connections: Vec<[&str; 2]> = macs.iter().map(|mac| ["mac", mac.as_str()]).collect();

    json!({
        "name": format!("{}_{}", topics.device_name, sensor.entity),
        "platform": "mqtt",
        "unique_id": uid,
        "device": {
            "identifiers": [uid],
            "connections": connections,
            "model": mqtt_const::MODEL,
            "sw_version": VERSION,
            "manufacturer": mqtt_const::MANUFACTURER,
        },
        "availability_topic": topics.status,
        "payload_available": mqtt_const::PAYLOAD_AVAILABLE,
        "payload_not_available": mqtt_const::PAYLOAD_NOT_AVAILABLE,
        "state_topic": topics.json,
        "unit_of_measurement": sensor.unit,
        "value_template": format!("{{{{ value_json.{} }}}}", sensor.value_name),
    })
    .to_string()
}

/// Human readable CONNACK return code
pub fn connack_message(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "Connection successful",
        ConnectReturnCode::RefusedProtocolVersion => {
            "Connection refused - incorrect protocol version"
        }
        ConnectReturnCode::BadClientId => "Connection refused - invalid client identifier",
        ConnectReturnCode::ServiceUnavailable => "Connection refused - server unavailable",
        ConnectReturnCode::BadUserNamePassword => "Connection refused - bad username or password",
        ConnectReturnCode::NotAuthorized => "Connection refused - not authorised",
    }
}

/// Gate for state publishes
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    interval: Duration,
    next: Option<Instant>,
}

impl UpdateThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// First publish is due a short delay after connecting
    pub fn on_connect(&mut self, now: Instant) {
        self.next = Some(now + mqtt_const::FIRST_PUBLISH_DELAY);
    }

    pub fn on_disconnect(&mut self) {
        self.next = None;
    }

    /// `true` when a publish is due; schedules the next one
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.next {
            Some(due) if now >= due => {
                self.next = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}

/// State shared with the event loop task
#[derive(Debug, Clone)]
struct Link {
    connected: Arc<AtomicBool>,
    throttle: Arc<Mutex<UpdateThrottle>>,
}

/// Retained messages sent after every successful connect
fn announcements(topics: &Topics, macs: &[String]) -> Vec<(String, String)> {
    let mut messages = vec![(
        topics.status.clone(),
        mqtt_const::PAYLOAD_AVAILABLE.to_string(),
    )];
    if !topics.discovery_prefix.is_empty() {
        for sensor in &SENSOR_ENTITIES {
            messages.push((topics.discovery(sensor), discovery_payload(topics, sensor, macs)));
        }
    }
    messages
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    link: Link,
    announce: Vec<(String, String)>,
    server: String,
) {
    let mut delay = mqtt_const::RECONNECT_MIN_DELAY;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!(server = %server, "MQTT connect failed: {}", connack_message(ack.code));
                    continue;
                }
                info!(server = %server, "Connected to MQTT server");
                delay = mqtt_const::RECONNECT_MIN_DELAY;
                link.connected.store(true, Ordering::SeqCst);
                link.throttle.lock().on_connect(Instant::now());
                for (topic, payload) in &announce {
                    debug!(topic = %topic, "Publishing announcement");
                    if let Err(e) =
                        client.try_publish(topic.as_str(), QoS::ExactlyOnce, true, payload.as_bytes())
                    {
                        warn!(topic = %topic, "MQTT publish failed: {}", e);
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                link.connected.store(false, Ordering::SeqCst);
                debug!("MQTT disconnect sent");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                if link.connected.swap(false, Ordering::SeqCst) {
                    link.throttle.lock().on_disconnect();
                }
                match e {
                    ConnectionError::ConnectionRefused(code) => {
                        warn!(server = %server, "MQTT connect failed: {}", connack_message(code))
                    }
                    other => warn!(server = %server, "MQTT connection error: {}", other),
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(mqtt_const::RECONNECT_MAX_DELAY);
            }
        }
    }
}

/// Queue the retained offline status; `false` when it could not be queued
fn publish_offline(client: &AsyncClient, status_topic: &str) -> bool {
    match client.try_publish(
        status_topic,
        QoS::ExactlyOnce,
        true,
        mqtt_const::PAYLOAD_NOT_AVAILABLE,
    ) {
        Ok(()) => true,
        Err(e) => {
            warn!(topic = %status_topic, "MQTT offline status publish failed: {}", e);
            false
        }
    }
}

/// A configured broker connection
#[derive(Debug)]
pub struct MqttSession {
    settings: MqttSettings,
    client_id: String,
    macs: Vec<String>,
    topics: Topics,
    link: Link,
    client: Option<AsyncClient>,
    runtime: Option<Runtime>,
    task: Option<JoinHandle<()>>,
}

impl MqttSession {
    pub fn new(settings: MqttSettings, identity: &Identity) -> Self {
        let device_name = settings
            .device_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| identity.hostname.clone());
        let topics = Topics::new(&settings.topic, &device_name, &settings.discovery_prefix);
        let link = Link {
            connected: Arc::new(AtomicBool::new(false)),
            throttle: Arc::new(Mutex::new(UpdateThrottle::new(settings.update_interval))),
        };
        Self {
            settings,
            client_id: identity.client_id.clone(),
            macs: identity.macs.clone(),
            topics,
            link,
            client: None,
            runtime: None,
            task: None,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(mqtt_const::KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            self.topics.status.clone(),
            mqtt_const::PAYLOAD_NOT_AVAILABLE,
            QoS::ExactlyOnce,
            true,
        ));
        if let (Some(user), true) = (&self.settings.user, self.settings.has_credentials()) {
            options.set_credentials(user.clone(), self.settings.password.clone());
        }
        options
    }

    fn begin(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Ok(());
        }
        info!(server = %self.settings.server(), client_id = %self.client_id, "Connecting to MQTT server");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("fanspeed-mqtt")
            .enable_all()
            .build()
            .map_err(|e| FanspeedError::Mqtt(format!("Failed to start runtime: {}", e)))?;

        let (client, eventloop) =
            AsyncClient::new(self.options(), mqtt_const::REQUEST_QUEUE_CAPACITY);
        let task = runtime.spawn(drive(
            eventloop,
            client.clone(),
            self.link.clone(),
            announcements(&self.topics, &self.macs),
            self.settings.server(),
        ));

        self.client = Some(client);
        self.task = Some(task);
        self.runtime = Some(runtime);
        Ok(())
    }

    fn end(&mut self) {
        if let Some(client) = self.client.take() {
            if self.is_connected() {
                debug!("Disconnecting from MQTT server");
                publish_offline(&client, &self.topics.status);
                if let Err(e) = client.try_disconnect() {
                    warn!("MQTT disconnect failed: {}", e);
                }
            }
        }

        if let Some(runtime) = self.runtime.take() {
            if let Some(task) = self.task.take() {
                let finished = runtime.block_on(async {
                    tokio::time::timeout(mqtt_const::DISCONNECT_GRACE, task)
                        .await
                        .is_ok()
                });
                if !finished {
                    debug!("MQTT event loop did not stop in time");
                }
            }
            runtime.shutdown_timeout(mqtt_const::DISCONNECT_GRACE);
        }

        self.link.connected.store(false, Ordering::SeqCst);
        self.link.throttle.lock().on_disconnect();
    }

    fn publish(&mut self, report: &Report) -> Result<bool> {
        let Some(client) = &self.client else {
            return Ok(false);
        };
        if !self.is_connected() || !self.link.throttle.lock().ready(Instant::now()) {
            return Ok(false);
        }

        let payload = report.to_json();
        debug!(topic = %self.topics.json, payload = %payload, "Publishing state");
        client
            .try_publish(self.topics.json.as_str(), QoS::ExactlyOnce, true, payload)
            .map_err(|e| FanspeedError::Mqtt(e.to_string()))?;
        client
            .try_publish(
                self.topics.status.as_str(),
                QoS::ExactlyOnce,
                true,
                mqtt_const::PAYLOAD_AVAILABLE,
            )
            .map_err(|e| FanspeedError::Mqtt(e.to_string()))?;
        Ok(true)
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if self.runtime.is_some() {
            self.end();
        }
    }
}

/// MQTT output: a no-op when no broker is configured
#[derive(Debug)]
pub enum MqttPublisher {
    Disabled,
    Enabled(Box<MqttSession>),
}

impl MqttPublisher {
    pub fn new(settings: Option<MqttSettings>, identity: &Identity) -> Self {
        match settings {
            Some(settings) => MqttPublisher::Enabled(Box::new(MqttSession::new(settings, identity))),
            None => MqttPublisher::Disabled,
        }
    }

    pub fn server(&self) -> String {
        match self {
            MqttPublisher::Disabled => "none".to_string(),
            MqttPublisher::Enabled(session) => session.settings.server(),
        }
    }

    /// Start connecting in the background
    pub fn begin(&mut self) -> Result<()> {
        match self {
            MqttPublisher::Disabled => Ok(()),
            MqttPublisher::Enabled(session) => session.begin(),
        }
    }

    /// Disconnect and stop the background loop
    pub fn end(&mut self) {
        if let MqttPublisher::Enabled(session) = self {
            session.end();
        }
    }

    /// Publish when connected and due; `Ok(true)` if something was sent
    pub fn publish(&mut self, report: &Report) -> Result<bool> {
        match self {
            MqttPublisher::Disabled => Ok(false),
            MqttPublisher::Enabled(session) => session.publish(report),
        }
    }

    pub fn available(&self) -> bool {
        matches!(self, MqttPublisher::Enabled(_))
    }
}

impl Reporter for MqttPublisher {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn report(&mut self, report: &Report) -> Result<()> {
        self.publish(report).map(|_| ())
    }

    fn finish(&mut self) -> Result<()> {
        self.end();
        Ok(())
    }
}
