//! Monitored Proxmox guests

use serde::{Deserialize, Serialize};
use std::fmt;

/// Proxmox guest type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuestKind {
    #[serde(rename = "VM")]
    Vm,
    #[serde(rename = "CT")]
    Ct,
}

impl GuestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Vm => "VM",
            GuestKind::Ct => "CT",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A VM or CT on a Proxmox host. `(proxmox_host, vmid)` is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    proxmox_host: String,
    vmid: u32,
    kind: GuestKind,
    display_name: String,
}

impl Device {
    /// The host is trimmed and lowercased: MQTT topics and Home Assistant
    /// unique ids are case-sensitive.
    pub fn new(proxmox_host: &str, vmid: u32, kind: GuestKind, display_name: Option<&str>) -> Self {
        let proxmox_host = normalize_host(proxmox_host);
        let display_name = match display_name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{} {} {}", proxmox_host, kind, vmid),
        };

        Self {
            proxmox_host,
            vmid,
            kind,
            display_name,
        }
    }

    pub fn proxmox_host(&self) -> &str {
        &self.proxmox_host
    }

    pub fn vmid(&self) -> u32 {
        self.vmid
    }

    pub fn kind(&self) -> GuestKind {
        self.kind
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.proxmox_host, self.kind, self.vmid)
    }
}

pub fn normalize_host(host: &str) -> String {
    host.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_is_lowercased() {
        let device = Device::new("  PVE1 ", 101, GuestKind::Ct, None);
        assert_eq!(device.proxmox_host(), "pve1");
        assert_eq!(device.display_name(), "pve1 CT 101");
    }

    #[test]
    fn test_blank_display_name_falls_back() {
        let device = Device::new("pve2", 7, GuestKind::Vm, Some("   "));
        assert_eq!(device.display_name(), "pve2 VM 7");
    }
}
