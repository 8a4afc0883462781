//! Plain-text and `JSON` projections of the node status.

use alloc::string::String;

use core::fmt::{self, Write};
use core::time::Duration;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::history::Seconds;
use crate::line::MonitoredLine;

/// Link quality at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    /// Name of the access point the node is connected to.
    pub access_point: String,
    /// Node `MAC` address.
    pub mac: [u8; 6],
    /// Received signal strength in dBm.
    pub rssi: i32,
}

impl LinkSnapshot {
    /// Creates a [`LinkSnapshot`].
    #[must_use]
    pub fn new(access_point: impl Into<String>, mac: [u8; 6], rssi: i32) -> Self {
        Self {
            access_point: access_point.into(),
            mac,
            rssi,
        }
    }

    /// Returns the signal quality as a percentage.
    #[must_use]
    pub const fn signal_percent(&self) -> u8 {
        signal_percent(self.rssi)
    }
}

/// Converts a signal strength in dBm into a percentage.
///
/// -100 dBm or less is 0%, -50 dBm or more is 100%.
#[must_use]
pub const fn signal_percent(rssi: i32) -> u8 {
    let percent = rssi.saturating_add(100).saturating_mul(2);
    if percent <= 0 {
        0
    } else if percent >= 100 {
        100
    } else {
        percent as u8
    }
}

/// Source of the link-quality snapshot.
pub trait LinkInfo {
    /// Returns the current link quality.
    fn snapshot(&self) -> LinkSnapshot;
}

impl LinkInfo for LinkSnapshot {
    fn snapshot(&self) -> LinkSnapshot {
        self.clone()
    }
}

/// A `MAC` address written as colon-separated uppercase hex pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Everything reported about the node at a given instant.
///
/// The view only borrows the node state: building it never mutates anything.
#[derive(Debug, Clone, Copy)]
pub struct StatusView<'a> {
    /// Node host name.
    pub host: &'a str,
    /// Number of status requests served.
    pub request_count: u32,
    /// Smoothed fraction of the tick period spent working.
    pub load: f32,
    /// Time since boot.
    pub uptime: Duration,
    /// Monitored lines, in arena order.
    pub lines: &'a [MonitoredLine],
    /// Link quality.
    pub link: &'a LinkSnapshot,
}

impl StatusView<'_> {
    /// Writes the plain-text status.
    ///
    /// # Errors
    ///
    /// The writer failed.
    pub fn render_text(&self, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "HOST: {}", self.host)?;
        writeln!(out, "RC: {}", self.request_count)?;
        writeln!(out, "Load: {:.4}", self.load)?;
        writeln!(out, "Uptime: {}s", self.uptime.as_secs())?;
        for line in self.lines {
            writeln!(
                out,
                "GPIO{}: {} ({}s)",
                line.id(),
                line.state().label(),
                Seconds(line.elapsed(self.uptime))
            )?;
        }
        writeln!(
            out,
            "WIFI: AP={} MAC={} RSSI={} Signal={}%",
            self.link.access_point,
            MacAddress(self.link.mac),
            self.link.rssi,
            self.link.signal_percent()
        )
    }

    /// Returns the plain-text status.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        // Writing into a `String` cannot fail.
        let _ = self.render_text(&mut text);
        text
    }

    /// Returns the `JSON` status.
    ///
    /// # Errors
    ///
    /// The status could not be serialized.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&StatusDocument::from(self))
    }
}

#[derive(Serialize)]
struct StatusDocument<'a> {
    #[serde(rename = "NODE")]
    node: NodeSection<'a>,
    #[serde(rename = "SWITCHES")]
    switches: Switches<'a>,
    #[serde(rename = "SINCE")]
    since: Since<'a>,
    #[serde(rename = "WIFI")]
    wifi: WifiSection<'a>,
}

impl<'a> From<&StatusView<'a>> for StatusDocument<'a> {
    fn from(view: &StatusView<'a>) -> Self {
        Self {
            node: NodeSection {
                host: view.host,
                request_count: view.request_count,
                load: view.load,
                uptime: view.uptime.as_secs(),
            },
            switches: Switches(view.lines),
            since: Since {
                lines: view.lines,
                now: view.uptime,
            },
            wifi: WifiSection {
                access_point: &view.link.access_point,
                mac: MacAddress(view.link.mac),
                rssi: view.link.rssi,
                signal: view.link.signal_percent(),
            },
        }
    }
}

#[derive(Serialize)]
struct NodeSection<'a> {
    #[serde(rename = "HOST")]
    host: &'a str,
    #[serde(rename = "RC")]
    request_count: u32,
    #[serde(rename = "Load")]
    load: f32,
    #[serde(rename = "Uptime")]
    uptime: u64,
}

// Serializes any `Display` value as a string.
struct Text<T>(T);

impl<T: fmt::Display> Serialize for Text<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

struct LineKey(u8);

impl Serialize for LineKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Text(format_args!("GPIO{}", self.0)).serialize(serializer)
    }
}

struct Switches<'a>(&'a [MonitoredLine]);

impl Serialize for Switches<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for line in self.0 {
            map.serialize_entry(&LineKey(line.id()), line.state().label())?;
        }
        map.end()
    }
}

struct Since<'a> {
    lines: &'a [MonitoredLine],
    now: Duration,
}

impl Serialize for Since<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.lines.len()))?;
        for line in self.lines {
            let millis = line.elapsed(self.now).as_millis();
            map.serialize_entry(&LineKey(line.id()), &(millis as f64 / 1000.0))?;
        }
        map.end()
    }
}

struct WifiSection<'a> {
    access_point: &'a str,
    mac: MacAddress,
    rssi: i32,
    signal: u8,
}

impl Serialize for WifiSection<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("AP", self.access_point)?;
        map.serialize_entry("MAC", &Text(self.mac))?;
        map.serialize_entry("RSSI", &Text(self.rssi))?;
        map.serialize_entry("Signal", &Text(format_args!("{}%", self.signal)))?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use serde_json::{Value, json};

    use crate::line::LineMonitor;
    use crate::line::tests::FakePin;

    use super::{LinkSnapshot, MacAddress, StatusView, signal_percent};

    fn link() -> LinkSnapshot {
        LinkSnapshot::new("home", [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01], -67)
    }

    #[test]
    fn signal() {
        assert_eq!(signal_percent(-120), 0);
        assert_eq!(signal_percent(-100), 0);
        assert_eq!(signal_percent(-67), 66);
        assert_eq!(signal_percent(-50), 100);
        assert_eq!(signal_percent(-20), 100);
        assert_eq!(signal_percent(i32::MIN), 0);
    }

    #[test]
    fn mac_format() {
        assert_eq!(
            alloc::format!("{}", MacAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01])),
            "DE:AD:BE:EF:00:01"
        );
    }

    #[test]
    fn json_without_lines() {
        let link = link();
        let view = StatusView {
            host: "node",
            request_count: 0,
            load: 0.0,
            uptime: Duration::from_secs(5),
            lines: &[],
            link: &link,
        };

        let value: Value = serde_json::from_str(&view.to_json().unwrap()).unwrap();
        assert_eq!(value["SWITCHES"], json!({}));
        assert_eq!(value["SINCE"], json!({}));
        assert_eq!(value["NODE"]["Uptime"], json!(5));
    }

    #[test]
    fn json_document() {
        let first = FakePin::default();
        let second = FakePin::default();
        let mut monitor = LineMonitor::<_, 4, 8>::new()
            .line(2, first.clone())
            .unwrap()
            .line(4, second.clone())
            .unwrap()
            .line(5, FakePin::default())
            .unwrap();

        first.set(true);
        let _ = monitor.sample_all(Duration::from_millis(1_000));
        second.set(true);
        let _ = monitor.sample_all(Duration::from_millis(3_500));

        let link = link();
        let view = StatusView {
            host: "node",
            request_count: 7,
            load: 0.25,
            uptime: Duration::from_millis(10_250),
            lines: &monitor.lines()[..2],
            link: &link,
        };

        let json = view.to_json().unwrap();
        assert_eq!(
            json,
            "{\"NODE\":{\"HOST\":\"node\",\"RC\":7,\"Load\":0.25,\"Uptime\":10},\
             \"SWITCHES\":{\"GPIO2\":\"OPEN\",\"GPIO4\":\"OPEN\"},\
             \"SINCE\":{\"GPIO2\":9.25,\"GPIO4\":6.75},\
             \"WIFI\":{\"AP\":\"home\",\"MAC\":\"DE:AD:BE:EF:00:01\",\"RSSI\":\"-67\",\"Signal\":\"66%\"}}"
        );
    }

    #[test]
    fn unknown_lines() {
        let monitor = LineMonitor::<FakePin, 4, 8>::new()
            .line(2, FakePin::default())
            .unwrap();
        let link = link();
        let view = StatusView {
            host: "node",
            request_count: 0,
            load: 0.0,
            uptime: Duration::from_secs(1),
            lines: monitor.lines(),
            link: &link,
        };

        let value: Value = serde_json::from_str(&view.to_json().unwrap()).unwrap();
        assert_eq!(value["SWITCHES"]["GPIO2"], json!("UNKNOWN"));
    }

    #[test]
    fn text_status() {
        let pin = FakePin::default();
        let mut monitor = LineMonitor::<_, 4, 8>::new().line(2, pin.clone()).unwrap();
        let _ = monitor.sample_all(Duration::from_secs(2));

        let link = link();
        let view = StatusView {
            host: "node",
            request_count: 3,
            load: 0.5,
            uptime: Duration::from_millis(14_345),
            lines: monitor.lines(),
            link: &link,
        };

        assert_eq!(
            view.to_text(),
            "HOST: node\n\
             RC: 3\n\
             Load: 0.5000\n\
             Uptime: 14s\n\
             GPIO2: CLOSED (12.345s)\n\
             WIFI: AP=home MAC=DE:AD:BE:EF:00:01 RSSI=-67 Signal=66%\n"
        );
    }
}
