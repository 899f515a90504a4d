/*!
 * Service discovery types.
 *
 * A network browser (see [`crate::mdns`]) feeds [`BrowserEvent`]s into the
 * registry and is asked to start browsing through the [`ServiceBrowser`]
 * trait once it reports that it is ready.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::net::IpAddr;

use dvremote_core::types::Id;

use crate::device::{DeviceError, Result};

/// TXT record key carrying the device serial number
pub const SERIAL_KEY: &str = "TSN";

/// A service advertisement as reported by the network browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Query terms the advertisement answered, service type first
    pub query: Vec<String>,
    /// Composite instance name, e.g. `Living Room._tivo-remote._tcp.local`
    pub full_name: String,
    /// Raw `key=value` TXT strings
    pub txt: Vec<String>,
    /// Resolved addresses; the first one is used to connect
    pub addresses: Vec<IpAddr>,
    /// Service port
    pub port: u16,
}

impl ServiceDescriptor {
    /// Whether the first query term starts with `service_type`
    ///
    /// The comparison is case-sensitive.
    pub fn matches_service_type(&self, service_type: &str) -> bool {
        self.query
            .first()
            .is_some_and(|term| term.starts_with(service_type))
    }

    /// The first label of the composite name
    pub fn friendly_name(&self) -> &str {
        self.full_name.split('.').next().unwrap_or_default()
    }

    /// Parse the TXT strings into a typed record
    pub fn txt_record(&self) -> TxtRecord {
        TxtRecord::parse(&self.txt)
    }
}

/// Parsed TXT metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtRecord {
    entries: HashMap<String, String>,
}

impl TxtRecord {
    /// Parse `key=value` strings.
    ///
    /// Each entry is split on its first `=`. An entry without `=` maps the
    /// key to an empty value. When a key repeats, the last entry wins.
    pub fn parse<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|entry| {
                let entry = entry.as_ref();
                match entry.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (entry.to_string(), String::new()),
                }
            })
            .collect();

        Self { entries }
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Look up a key that must be present with a non-empty value
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(DeviceError::MissingIdentity(key.to_string())),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Who a device is and where to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Human-readable name, not guaranteed unique
    pub name: String,
    /// Serial number, unique per device
    pub id: Id,
    /// Address the session connects to
    pub address: IpAddr,
    /// Port the session connects to
    pub port: u16,
}

impl DeviceIdentity {
    /// Derive the identity from an advertisement
    pub fn from_descriptor(descriptor: &ServiceDescriptor) -> Result<Self> {
        let txt = descriptor.txt_record();
        let id = Id::from(txt.require(SERIAL_KEY)?);

        let address = *descriptor
            .addresses
            .first()
            .ok_or_else(|| DeviceError::MissingAddress(descriptor.full_name.clone()))?;

        Ok(Self {
            name: descriptor.friendly_name().to_string(),
            id,
            address,
            port: descriptor.port,
        })
    }
}

/// Notifications from the network browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    /// The browser is ready; browsing should be started
    Ready,
    /// A service was advertised or re-advertised
    ServiceUp(ServiceDescriptor),
    /// A service was withdrawn
    ServiceDown(ServiceDescriptor),
}

/// Control surface of the network browser
pub trait ServiceBrowser: Send + Sync + Debug {
    /// Start actively browsing for services
    fn discover(&self) -> Result<()>;
}
