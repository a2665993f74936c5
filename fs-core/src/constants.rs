//! Constants and configuration defaults for fanspeed
//!
//! Centralizes the magic numbers of the controller: curve defaults, tachometer
//! tuning, boost ramp timing, stall detection and hardware paths.
//! Add new values here first and reference them from the other modules.

use std::time::Duration;

/// System paths
pub mod paths {
    /// CPU thermal zone exposed by the kernel (millidegrees Celsius)
    pub const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

    /// Base directory of the sysfs PWM class
    pub const PWM_CLASS_BASE: &str = "/sys/class/pwm";

    /// Default PID file location
    pub const PID_FILE: &str = "/var/run/raspi_fanspeed.pid";

    /// Network interfaces (MAC addresses live in `<iface>/address`)
    pub const NET_CLASS_BASE: &str = "/sys/class/net";
}

/// Speed curve defaults
pub mod curve {
    /// Temperature below which the fan is off (Celsius)
    pub const DEFAULT_MIN_TEMP: f64 = 45.0;

    /// Temperature at which the fan reaches full speed (Celsius)
    pub const DEFAULT_MAX_TEMP: f64 = 70.0;

    /// Lowest duty cycle the fan is driven at once it is on (percent)
    pub const DEFAULT_MIN_DUTY_PERCENT: f64 = 40.0;

    /// Curve exponent, 1.0 is linear
    pub const DEFAULT_EXPONENT: f64 = 1.0;

    /// Smallest accepted curve exponent
    pub const MIN_EXPONENT: f64 = 1.0;

    /// Maximum duty cycle (percent)
    pub const MAX_PERCENT: f64 = 100.0;

    /// First temperature of the printed speed table (Celsius)
    pub const TABLE_START_TEMP: i32 = 30;

    /// Last temperature of the printed speed table (Celsius)
    pub const TABLE_END_TEMP: i32 = 90;
}

/// Tachometer (RPM) measurement
pub mod tach {
    use super::*;

    /// Tick unit of edge timestamps: microseconds
    pub const TICKS_PER_SECOND: f64 = 1_000_000.0;

    /// Default smoothing factor of the adaptive exponential filter
    pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.25;

    /// Falling edges per mechanical revolution of the reference fan
    pub const DEFAULT_EDGES_PER_REVOLUTION: f64 = 2.0;

    /// An estimate is discarded when no edge arrives for this long
    pub const STALE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Pulse counts at or below this are treated as noise (0 RPM)
    pub const MIN_PULSE_COUNT: u64 = 10;

    /// Default GPIO pin carrying the tachometer signal
    pub const DEFAULT_RPM_PIN: u8 = 16;

    /// Seconds per minute
    pub const SECONDS_PER_MINUTE: f64 = 60.0;
}

/// Startup boost ramp applied when spinning up from rest
pub mod boost {
    use super::*;

    /// Requested levels below this (and above zero) start with a boost ramp
    pub const LOW_SPEED_THRESHOLD: f64 = 40.0;

    /// Level of the boost pulse (percent)
    pub const BOOST_PERCENT: f64 = 100.0;

    /// Hold at the requested level before the boost pulse
    pub const INITIAL_HOLD: Duration = Duration::from_millis(100);

    /// Hold at the boost level
    pub const BOOST_HOLD: Duration = Duration::from_millis(250);

    /// Hold at each intermediate step on the way down
    pub const STEP_HOLD: Duration = Duration::from_millis(150);
}

/// Stall detection after a duty cycle change
pub mod stall {
    use super::*;

    /// Time for the fan to settle before the first measurement
    pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

    /// Length of the first RPM measurement window
    pub const SAMPLE_WINDOW: Duration = Duration::from_millis(2500);

    /// Re-measurements before a zero reading counts as a stall
    pub const RETRIES: u32 = 5;

    /// Length of each re-measurement window
    pub const RETRY_WINDOW: Duration = Duration::from_secs(1);

    /// Duty cycle committed after a stall is detected (percent)
    pub const ESCALATION_PERCENT: f64 = 100.0;
}

/// PWM output
pub mod pwm {
    /// Default hardware PWM frequency (Hz)
    pub const DEFAULT_FREQUENCY_HZ: u32 = 32_000;

    /// Default PWM pin
    pub const DEFAULT_PIN: u8 = 19;

    /// Requests below this are committed as 0 (percent); the daemon uses the minimum fan speed
    pub const DEFAULT_FLOOR_PERCENT: f64 = 0.0;

    /// Pins with hardware PWM on the Raspberry Pi header
    pub const HARDWARE_PINS: [u8; 4] = [12, 13, 18, 19];

    /// Nanoseconds per second (sysfs PWM periods are in ns)
    pub const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

    /// Convert a percentage (0-100) into a duty fraction (0.0-1.0)
    #[inline]
    pub fn to_fraction(percent: f64) -> f64 {
        (percent / 100.0).clamp(0.0, 1.0)
    }
}

/// Temperature constants
pub mod temperature {
    /// Thermal zone readings are in millidegrees, divide by this to get Celsius
    pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;
}

/// Control loop timing
pub mod control {
    /// Default seconds between control ticks
    pub const DEFAULT_INTERVAL_SECS: u64 = 10;

    /// Default exit duty cycle (percent), -1 turns the fan off on exit
    pub const DEFAULT_ONEXIT_PERCENT: f64 = 75.0;

    /// Exit duty cycle value that means "turn the fan off"
    pub const ONEXIT_DISABLED: f64 = -1.0;
}

/// Reporting sinks
pub mod report {
    /// Consecutive command failures after which the command sink gives up
    pub const MAX_COMMAND_ERRORS: u32 = 10;

    /// Placeholder replaced by the JSON record in command templates
    pub const MESSAGE_PLACEHOLDER: &str = "{message}";

    /// Log targets that disable the log file sink
    pub const NULL_LOG_TARGETS: [&str; 4] = ["nul", "null", "/dev/nul", "/dev/null"];
}

/// MQTT client defaults
pub mod mqtt {
    use super::*;

    /// Default broker port
    pub const DEFAULT_PORT: u16 = 1883;

    /// Default topic template
    pub const DEFAULT_TOPIC: &str = "home/{device_name}/{entity}";

    /// Default Home Assistant discovery prefix
    pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

    /// Default seconds between state publishes
    pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

    /// Accepted range of the update interval (seconds)
    pub const MIN_UPDATE_INTERVAL_SECS: u64 = 30;
    pub const MAX_UPDATE_INTERVAL_SECS: u64 = 900;

    /// Delay of the first state publish after connecting
    pub const FIRST_PUBLISH_DELAY: Duration = Duration::from_secs(5);

    /// Keep-alive sent to the broker
    pub const KEEP_ALIVE: Duration = Duration::from_secs(15);

    /// Reconnect back-off bounds
    pub const RECONNECT_MIN_DELAY: Duration = Duration::from_secs(5);
    pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

    /// Status payloads
    pub const PAYLOAD_AVAILABLE: &str = "1";
    pub const PAYLOAD_NOT_AVAILABLE: &str = "0";

    /// Entity suffixes of the state topics
    pub const STATUS_ENTITY: &str = "RPi.fanspeed/status";
    pub const JSON_ENTITY: &str = "RPi.fanspeed/json";

    /// Device metadata announced through discovery
    pub const MODEL: &str = "RPi.fanspeed";
    pub const MANUFACTURER: &str = "KFCLabs";

    /// Prefix for hostnames that start with `localhost`
    pub const LOCALHOST_PREFIX: &str = "RPi.fanspeed.";

    /// Hex digits kept from identity hashes
    pub const ID_HEX_LEN: usize = 11;

    /// Time given to the connection to flush a clean disconnect
    pub const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

    /// Capacity of the outgoing request queue
    pub const REQUEST_QUEUE_CAPACITY: usize = 16;
}
