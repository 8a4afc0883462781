use std::fs;
use std::path::{Path, PathBuf};

use linewatch::status::{LinkInfo, LinkSnapshot};

use tracing::info;

use crate::mac::{SYS_CLASS_NET, find_interface};

/// Wireless statistics exported by the Linux kernel.
pub const PROC_NET_WIRELESS: &str = "/proc/net/wireless";

/// Signal strength reported when no wireless statistics are available.
pub const NO_SIGNAL_RSSI: i32 = -100;

/// Link information of a Linux host.
///
/// The `MAC` address and the interface are discovered once, at creation. The
/// signal strength is read from the kernel wireless statistics on every
/// snapshot.
#[derive(Debug, Clone)]
pub struct LinuxLink {
    access_point: String,
    interface: Option<String>,
    mac: [u8; 6],
    wireless_stats: PathBuf,
}

impl LinuxLink {
    /// Discovers the host network interface.
    ///
    /// `access_point` is the name reported as the access point, usually the
    /// stored network identifier.
    #[must_use]
    pub fn discover(access_point: impl Into<String>) -> Self {
        let link = Self::new(access_point);
        match find_interface(Path::new(SYS_CLASS_NET)) {
            Some(interface) => {
                info!("Reporting link information of `{}`", interface.name);
                link.interface(interface.name).mac(interface.mac)
            }
            None => link,
        }
    }

    /// Creates a [`LinuxLink`] without an interface.
    #[must_use]
    pub fn new(access_point: impl Into<String>) -> Self {
        Self {
            access_point: access_point.into(),
            interface: None,
            mac: [0; 6],
            wireless_stats: PathBuf::from(PROC_NET_WIRELESS),
        }
    }

    /// Sets the interface whose signal strength is reported.
    #[must_use]
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.interface = Some(name.into());
        self
    }

    /// Sets the reported `MAC` address.
    #[must_use]
    pub const fn mac(mut self, mac: [u8; 6]) -> Self {
        self.mac = mac;
        self
    }

    /// Sets the path of the wireless statistics file.
    #[must_use]
    pub fn wireless_stats(mut self, path: impl Into<PathBuf>) -> Self {
        self.wireless_stats = path.into();
        self
    }

    fn rssi(&self) -> i32 {
        fs::read_to_string(&self.wireless_stats)
            .ok()
            .and_then(|stats| signal_level(&stats, self.interface.as_deref()))
            .unwrap_or(NO_SIGNAL_RSSI)
    }
}

impl LinkInfo for LinuxLink {
    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot::new(self.access_point.clone(), self.mac, self.rssi())
    }
}

// Reads the signal level, in dBm, of `interface` or of the first listed
// interface.
//
// The statistics start with two header lines, followed by one line per
// interface:
//
//   wlan0: 0000   54.  -56.  -256        0      0      0      0      0        0
fn signal_level(stats: &str, interface: Option<&str>) -> Option<i32> {
    stats
        .lines()
        .skip(2)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| interface.is_none_or(|interface| name.trim() == interface))
        .and_then(|(_, fields)| fields.split_whitespace().nth(2))
        .and_then(|level| level.trim_end_matches('.').parse::<f32>().ok())
        .map(|level| level as i32)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use linewatch::status::LinkInfo;

    use super::{LinuxLink, NO_SIGNAL_RSSI, signal_level};

    const STATS: &str = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
 wlan0: 0000   54.  -56.  -256        0      0      0      0      0        0
 wlan1: 0000   30.  -80.  -256        0      0      0      0      0        0
";

    #[test]
    fn parse_signal_level() {
        assert_eq!(signal_level(STATS, None), Some(-56));
        assert_eq!(signal_level(STATS, Some("wlan1")), Some(-80));
        assert_eq!(signal_level(STATS, Some("wlan2")), None);
        assert_eq!(signal_level("", None), None);
    }

    #[test]
    fn snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join("wireless");
        fs::write(&stats, STATS).unwrap();

        let link = LinuxLink::new("home")
            .interface("wlan0")
            .mac([0x00, 0x1a, 0x2b, 0, 0, 1])
            .wireless_stats(&stats);
        let snapshot = link.snapshot();

        assert_eq!(snapshot.access_point, "home");
        assert_eq!(snapshot.mac, [0x00, 0x1a, 0x2b, 0, 0, 1]);
        assert_eq!(snapshot.rssi, -56);
        assert_eq!(snapshot.signal_percent(), 88);
    }

    #[test]
    fn missing_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let link = LinuxLink::new("home").wireless_stats(dir.path().join("missing"));

        assert_eq!(link.snapshot().rssi, NO_SIGNAL_RSSI);
        assert_eq!(link.snapshot().signal_percent(), 0);
    }
}
