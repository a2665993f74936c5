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

//! Host identity for MQTT
//!
//! The client id and the discovery unique ids are short SHA-256 digests so
//! they stay stable across restarts and differ between boards.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use fs_core::constants::{mqtt, paths};

/// Host name, MAC addresses and the derived client id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub hostname: String,
    pub macs: Vec<String>,
    pub client_id: String,
}

impl Identity {
    /// Read the identity of this machine
    pub fn detect() -> Self {
        Self::from_parts(
            device_hostname(&system_hostname()),
            mac_addresses(Path::new(paths::NET_CLASS_BASE)),
        )
    }

    pub fn from_parts(hostname: String, macs: Vec<String>) -> Self {
        let client_id = client_id(&hostname, &macs);
        Self {
            hostname,
            macs,
            client_id,
        }
    }
}

/// `gethostname(2)`, empty on failure
pub fn system_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for buf.len() bytes and gethostname never writes past it.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return String::new();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Generic `localhost*` names get a product prefix
pub fn device_hostname(hostname: &str) -> String {
    if hostname.starts_with("localhost") {
        format!("{}{}", mqtt::LOCALHOST_PREFIX, hostname)
    } else {
        hostname.to_string()
    }
}

/// MAC addresses of all interfaces under `net_base`, skipping null addresses
pub fn mac_addresses(net_base: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(net_base) else {
        return Vec::new();
    };
    let mut interfaces: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    interfaces.sort();

    interfaces
        .iter()
        .filter_map(|iface| fs::read_to_string(iface.join("address")).ok())
        .map(|mac| mac.trim().to_string())
        .filter(|mac| !mac.is_empty() && !mac.contains("00:00:00"))
        .collect()
}

fn short_hex(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(mqtt::ID_HEX_LEN)
        .collect()
}

/// `sha256(hostname ":" (":" mac)*)`, first 11 hex digits
pub fn client_id(hostname: &str, macs: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(b":");
    for mac in macs {
        hasher.update(b":");
        hasher.update(mac.as_bytes());
    }
    short_hex(hasher)
}

/// `sha256(device ":" entity ":")`, first 11 hex digits
pub fn unique_id(device_name: &str, entity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_name.as_bytes());
    hasher.update(b":");
    hasher.update(entity.as_bytes());
    hasher.update(b":");
    short_hex(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_prefixed() {
        assert_eq!(device_hostname("localhost"), "RPi.fanspeed.localhost");
        assert_eq!(device_hostname("localhost.lan"), "RPi.fanspeed.localhost.lan");
        assert_eq!(device_hostname("raspberrypi"), "raspberrypi");
    }

    #[test]
    fn test_ids_are_short_and_stable() {
        let macs = vec!["b8:27:eb:12:34:56".to_string()];
        let a = client_id("pi", &macs);
        assert_eq!(a.len(), 11);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, client_id("pi", &macs));
        assert_ne!(a, client_id("pi2", &macs));
        assert_ne!(a, client_id("pi", &[]));

        let u = unique_id("pi", "rpm");
        assert_eq!(u.len(), 11);
        assert_ne!(u, unique_id("pi", "duty_cycle"));
    }

    #[test]
    fn test_mac_addresses_from_sysfs_layout() {
        let dir = tempfile::tempdir().unwrap();
        for (iface, mac) in [
            ("eth0", "b8:27:eb:12:34:56\n"),
            ("lo", "00:00:00:00:00:00\n"),
            ("wlan0", "b8:27:eb:ab:cd:ef\n"),
        ] {
            fs::create_dir(dir.path().join(iface)).unwrap();
            fs::write(dir.path().join(iface).join("address"), mac).unwrap();
        }
        fs::create_dir(dir.path().join("bond0")).unwrap();

        assert_eq!(
            mac_addresses(dir.path()),
            vec!["b8:27:eb:12:34:56".to_string(), "b8:27:eb:ab:cd:ef".to_string()]
        );
    }

    #[test]
    fn test_missing_net_dir_is_empty() {
        assert!(mac_addresses(Path::new("/nonexistent/net")).is_empty());
    }

    #[test]
    fn test_system_hostname_not_empty() {
        assert!(!system_hostname().is_empty());
    }
}
