use std::fs;
use std::path::Path;

use tracing::warn;

const IFACE_TYPE_ETHERNET: u16 = 1;
const IFACE_TYPE_WIFI: u16 = 801;

// Known MAC OUIs of virtual machine vendors.
const VM_MAC_PREFIXES: &[[u8; 3]] = &[
    [0x00, 0x05, 0x69], // VMware
    [0x00, 0x0C, 0x29], // VMware
    [0x00, 0x1C, 0x14], // VMware
    [0x00, 0x50, 0x56], // VMware
    [0x00, 0x03, 0xFF], // Microsoft Hyper-V
    [0x00, 0x15, 0x5D], // Microsoft Hyper-V
    [0x08, 0x00, 0x27], // Oracle VirtualBox
    [0x0A, 0x00, 0x27], // Oracle VirtualBox
    [0x00, 0x1C, 0x42], // Parallels
];

// Name prefixes of container and virtual network interfaces.
const VIRTUAL_PREFIXES: &[&str] = &["lo", "docker", "br-", "veth", "tun", "tap", "vmnet"];

/// Root directory of the network interfaces metadata on Linux.
pub(crate) const SYS_CLASS_NET: &str = "/sys/class/net";

/// A physical network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Interface {
    pub(crate) name: String,
    pub(crate) mac: [u8; 6],
    pub(crate) wireless: bool,
}

fn is_locally_administered(mac: [u8; 6]) -> bool {
    (mac[0] & 0x02) != 0
}

fn is_virtual_vendor(mac: [u8; 6]) -> bool {
    VM_MAC_PREFIXES.iter().any(|prefix| prefix == &mac[0..3])
}

pub(crate) fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.trim().split(':');

    for byte in &mut mac {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }

    parts.next().is_none().then_some(mac)
}

fn is_virtual(iface_path: &Path, name: &str, mac: [u8; 6]) -> bool {
    // Interfaces without a backing device are virtual.
    if !iface_path.join("device").exists() {
        return true;
    }

    if is_locally_administered(mac) || is_virtual_vendor(mac) {
        return true;
    }

    if let Ok(canonical) = fs::canonicalize(iface_path)
        && let Some(path) = canonical.to_str()
        && (path.contains("/sys/devices/virtual/") || path.contains("VMBUS"))
    {
        return true;
    }

    VIRTUAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn read_interface(iface_path: &Path) -> Option<Interface> {
    let name = iface_path.file_name()?.to_str()?.to_string();
    let mac = parse_mac(&fs::read_to_string(iface_path.join("address")).ok()?)?;

    if is_virtual(iface_path, &name, mac) {
        return None;
    }

    let iface_type = fs::read_to_string(iface_path.join("type"))
        .ok()?
        .trim()
        .parse::<u16>()
        .ok()?;

    let wireless = iface_path.join("wireless").exists();
    match (wireless, iface_type) {
        (true, IFACE_TYPE_WIFI) | (false, IFACE_TYPE_ETHERNET) => Some(Interface {
            name,
            mac,
            wireless,
        }),
        _ => None,
    }
}

/// Returns the node network interface found under `net_dir`, preferring a
/// wireless one over an ethernet one.
pub(crate) fn find_interface(net_dir: &Path) -> Option<Interface> {
    let Ok(entries) = fs::read_dir(net_dir) else {
        warn!("Unable to read {}", net_dir.display());
        return None;
    };

    let mut interfaces: Vec<Interface> = entries
        .flatten()
        .filter_map(|entry| read_interface(&entry.path()))
        .collect();

    // `read_dir` order is unspecified.
    interfaces.sort_by(|a, b| b.wireless.cmp(&a.wireless).then_with(|| a.name.cmp(&b.name)));
    interfaces.into_iter().next()
}
