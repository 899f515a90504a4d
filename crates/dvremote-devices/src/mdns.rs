/*!
 * Multicast DNS service browser.
 *
 * Wraps an `mdns-sd` daemon and turns its resolve/remove notifications into
 * [`BrowserEvent`]s for the registry.
 */
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::device::{DeviceError, Result};
use crate::discovery::{BrowserEvent, ServiceBrowser, ServiceDescriptor};

/// Browses the local network for DVR remote-control services
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    service_domain: String,
    events: mpsc::Sender<BrowserEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for MdnsBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdnsBrowser")
            .field("service_domain", &self.service_domain)
            .finish_non_exhaustive()
    }
}

impl MdnsBrowser {
    /// Start the mDNS daemon for `service_type`, e.g. `_tivo-remote`.
    ///
    /// The returned receiver already holds [`BrowserEvent::Ready`], so handing
    /// it to [`DeviceRegistry::run`](crate::DeviceRegistry::run) starts
    /// browsing straight away.
    pub fn new(service_type: &str, capacity: usize) -> Result<(Self, mpsc::Receiver<BrowserEvent>)> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DeviceError::Discovery(format!("Failed to start mDNS daemon: {}", e)))?;
        let (events, receiver) = mpsc::channel(capacity.max(1));

        events
            .try_send(BrowserEvent::Ready)
            .map_err(|e| DeviceError::Discovery(e.to_string()))?;

        let browser = Self {
            daemon,
            service_domain: format!("{}._tcp.local.", service_type),
            events,
            pump: Mutex::new(None),
        };
        Ok((browser, receiver))
    }

    /// Stop browsing and shut the daemon down
    pub fn shutdown(&self) -> Result<()> {
        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
        self.daemon
            .shutdown()
            .map(|_| ())
            .map_err(|e| DeviceError::Discovery(e.to_string()))
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn discover(&self) -> Result<()> {
        let receiver = self
            .daemon
            .browse(&self.service_domain)
            .map_err(|e| DeviceError::Discovery(format!("Failed to browse {}: {}", self.service_domain, e)))?;
        debug!("Browsing for {}", self.service_domain);

        let events = self.events.clone();
        let pump = tokio::task::spawn_blocking(move || {
            let mut resolved = HashMap::new();
            while let Ok(event) = receiver.recv() {
                let Some(event) = translate(event, &mut resolved) else {
                    continue;
                };
                if events.blocking_send(event).is_err() {
                    break;
                }
            }
            debug!("mDNS event stream ended");
        });

        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pump);
        if let Some(previous) = previous {
            warn!("Discovery restarted; dropping the previous browse");
            previous.abort();
        }
        Ok(())
    }
}

/// Map a daemon notification onto a browser event.
///
/// Resolved services are remembered by full name so that a later removal,
/// which only carries the name, can be reported with its descriptor.
fn translate(
    event: ServiceEvent,
    resolved: &mut HashMap<String, ServiceDescriptor>,
) -> Option<BrowserEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let descriptor = descriptor_from_info(&info);
            resolved.insert(descriptor.full_name.clone(), descriptor.clone());
            Some(BrowserEvent::ServiceUp(descriptor))
        }
        ServiceEvent::ServiceRemoved(_, full_name) => match resolved.remove(&full_name) {
            Some(descriptor) => Some(BrowserEvent::ServiceDown(descriptor)),
            None => {
                trace!("Ignoring removal of unresolved service {}", full_name);
                None
            }
        },
        other => {
            trace!("mDNS: {:?}", other);
            None
        }
    }
}

fn descriptor_from_info(info: &ServiceInfo) -> ServiceDescriptor {
    let txt = info
        .get_properties()
        .iter()
        .map(|property| format!("{}={}", property.key(), property.val_str()))
        .collect();

    // IPv4 first; the session connects to the first address.
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort_by_key(|address| (address.is_ipv6(), *address));

    ServiceDescriptor {
        query: vec![info.get_type().to_string()],
        full_name: info.get_fullname().to_string(),
        txt,
        addresses,
        port: info.get_port(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DeviceIdentity;

    const DOMAIN: &str = "_tivo-remote._tcp.local.";

    fn info(name: &str, tsn: &str) -> ServiceInfo {
        ServiceInfo::new(
            DOMAIN,
            name,
            "dvr.local.",
            "192.168.1.20",
            31339,
            &[("TSN", tsn), ("platform", "tcd/Series5")][..],
        )
        .unwrap()
    }

    #[test]
    fn test_resolved_service_becomes_descriptor() {
        let mut resolved = HashMap::new();
        let event = translate(ServiceEvent::ServiceResolved(info("Den", "8480001")), &mut resolved);

        let descriptor = match event {
            Some(BrowserEvent::ServiceUp(descriptor)) => descriptor,
            other => panic!("expected ServiceUp, got {:?}", other),
        };
        assert!(descriptor.matches_service_type("_tivo-remote"));
        assert_eq!(descriptor.friendly_name(), "Den");
        assert_eq!(descriptor.port, 31339);

        let identity = DeviceIdentity::from_descriptor(&descriptor).unwrap();
        assert_eq!(identity.id.as_str(), "8480001");
        assert_eq!(identity.address, "192.168.1.20".parse::<IpAddr>().unwrap());
        assert_eq!(descriptor.txt_record().get("platform"), Some("tcd/Series5"));
    }

    #[test]
    fn test_removal_reports_cached_descriptor() {
        let mut resolved = HashMap::new();
        let up = translate(ServiceEvent::ServiceResolved(info("Den", "8480001")), &mut resolved);
        let descriptor = match up {
            Some(BrowserEvent::ServiceUp(descriptor)) => descriptor,
            other => panic!("expected ServiceUp, got {:?}", other),
        };

        let down = translate(
            ServiceEvent::ServiceRemoved(DOMAIN.to_string(), descriptor.full_name.clone()),
            &mut resolved,
        );
        assert_eq!(down, Some(BrowserEvent::ServiceDown(descriptor)));
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_unresolved_removal_and_search_events_are_ignored() {
        let mut resolved = HashMap::new();
        let removed = ServiceEvent::ServiceRemoved(DOMAIN.to_string(), format!("Kitchen.{}", DOMAIN));
        assert_eq!(translate(removed, &mut resolved), None);
        assert_eq!(
            translate(ServiceEvent::SearchStarted(DOMAIN.to_string()), &mut resolved),
            None
        );
    }
}
