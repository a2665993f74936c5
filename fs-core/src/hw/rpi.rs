//! Raspberry Pi hardware PWM and GPIO edge interrupts (rppal)
//!
//! PWM pins need the matching `dtoverlay=pwm` / `pwm-2chan` entry in
//! `config.txt`. Edge event timestamps come from the kernel line event and are
//! on the monotonic clock, the same base as [`crate::engine::monotonic_micros`].

use std::collections::HashMap;

use rppal::gpio::{Event, Gpio, InputPin, Trigger};
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::{debug, info};

use crate::error::{FanspeedError, Result};
use crate::hw::{pwm_channel, EdgeCallback, EdgeKind, EdgeSource, EdgeSubscription, PwmSink};

/// Hardware PWM through the BCM PWM peripheral
///
/// Channels keep running after drop, so a level set with `--set` survives the
/// process.
#[derive(Debug, Default)]
pub struct RppalPwm {
    channels: HashMap<u8, Pwm>,
}

impl RppalPwm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PwmSink for RppalPwm {
    fn write_pwm(&mut self, pin: u8, frequency_hz: u32, duty_fraction: f64) -> Result<()> {
        let duty = duty_fraction.clamp(0.0, 1.0);
        let frequency = f64::from(frequency_hz);

        if let Some(channel) = self.channels.get(&pin) {
            return channel
                .set_frequency(frequency, duty)
                .map_err(|e| FanspeedError::pwm_write(pin, e.to_string()));
        }

        let channel = match pwm_channel(pin)? {
            0 => Channel::Pwm0,
            _ => Channel::Pwm1,
        };
        let mut output = Pwm::with_frequency(channel, frequency, duty, Polarity::Normal, true)
            .map_err(|e| FanspeedError::pwm_write(pin, e.to_string()))?;
        output.set_reset_on_drop(false);
        info!(pin, frequency_hz, "Opened hardware PWM channel");
        self.channels.insert(pin, output);
        Ok(())
    }
}

/// Async GPIO interrupts, one input pin per subscription
pub struct RppalEdges {
    gpio: Gpio,
    pins: HashMap<u8, InputPin>,
}

impl RppalEdges {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| FanspeedError::gpio(0, e.to_string()))?;
        Ok(Self {
            gpio,
            pins: HashMap::new(),
        })
    }
}

fn trigger_for(kind: EdgeKind) -> Trigger {
    match kind {
        EdgeKind::Rising => Trigger::RisingEdge,
        EdgeKind::Falling => Trigger::FallingEdge,
        EdgeKind::Both => Trigger::Both,
    }
}

impl EdgeSource for RppalEdges {
    fn subscribe(
        &mut self,
        pin: u8,
        kind: EdgeKind,
        mut on_edge: EdgeCallback,
    ) -> Result<EdgeSubscription> {
        let mut input = self
            .gpio
            .get(pin)
            .map_err(|e| FanspeedError::gpio(pin, e.to_string()))?
            .into_input();

        input
            .set_async_interrupt(trigger_for(kind), None, move |event: Event| {
                on_edge(event.timestamp.as_micros() as u64);
            })
            .map_err(|e| FanspeedError::gpio(pin, e.to_string()))?;

        debug!(pin, ?kind, "Subscribed to edge interrupts");
        self.pins.insert(pin, input);
        Ok(EdgeSubscription { pin, kind })
    }

    fn cancel(&mut self, handle: EdgeSubscription) -> Result<()> {
        if let Some(mut input) = self.pins.remove(&handle.pin) {
            input
                .clear_async_interrupt()
                .map_err(|e| FanspeedError::gpio(handle.pin, e.to_string()))?;
            debug!(pin = handle.pin, "Cancelled edge interrupts");
        }
        Ok(())
    }
}
