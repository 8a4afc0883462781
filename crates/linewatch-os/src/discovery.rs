use mdns_sd::{ServiceDaemon, ServiceInfo};

use tracing::{info, warn};

use crate::error::Result;

// Service type announced by every node.
const SERVICE_TYPE: &str = "_linewatch._tcp.local.";

/// The `mDNS-SD` advertisement of a node.
#[derive(Debug, Clone)]
pub struct Mdns {
    hostname: String,
    instance: String,
    service_type: &'static str,
    properties: Vec<(&'static str, &'static str)>,
}

impl Mdns {
    /// Creates the [`Mdns`] advertisement of `hostname`.
    ///
    /// The node is reachable at `<hostname>.local`.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            instance: hostname.clone(),
            hostname,
            service_type: SERVICE_TYPE,
            properties: vec![("scheme", "http"), ("status", "/json")],
        }
    }

    /// Sets the service instance name.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Sets the service type, such as `_linewatch._tcp.local.`.
    #[must_use]
    pub const fn service_type(mut self, service_type: &'static str) -> Self {
        self.service_type = service_type;
        self
    }

    /// Adds a `TXT` property.
    #[must_use]
    pub fn property(mut self, key: &'static str, value: &'static str) -> Self {
        self.properties.push((key, value));
        self
    }

    /// Returns the full host name, ending with `.local.`.
    #[must_use]
    pub fn host_name(&self) -> String {
        format!("{}.local.", self.hostname.trim_end_matches('.'))
    }

    /// Starts announcing the node on `port`.
    ///
    /// The announcement lasts as long as the returned [`MdnsHandle`].
    ///
    /// # Errors
    ///
    /// The responder could not be started or the service is invalid.
    pub fn register(self, port: u16) -> Result<MdnsHandle> {
        let host_name = self.host_name();
        let service = ServiceInfo::new(
            self.service_type,
            &self.instance,
            &host_name,
            "",
            port,
            &self.properties[..],
        )?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_string();

        let daemon = ServiceDaemon::new()?;
        daemon.register(service)?;

        info!("Announcing `{fullname}`, try `ping {host_name}`");

        Ok(MdnsHandle { daemon })
    }
}

/// A running `mDNS-SD` advertisement.
pub struct MdnsHandle {
    daemon: ServiceDaemon,
}

impl Drop for MdnsHandle {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("Unable to stop the mDNS responder: {e}");
        }
    }
}
