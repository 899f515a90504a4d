/*!
 * dvremote Devices
 *
 * Remote control for network-attached DVRs: the line protocol codec, the
 * per-device session, an mDNS browser, and a registry that opens sessions
 * for advertised devices.
 */

#![warn(missing_docs)]

pub mod device;
pub mod discovery;
pub mod mdns;
pub mod protocol;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use device::{DeviceError, DvrSession, Result, SessionEvent};
pub use discovery::{BrowserEvent, DeviceIdentity, ServiceBrowser, ServiceDescriptor, TxtRecord};
pub use mdns::MdnsBrowser;
pub use protocol::{Command, Response};
pub use registry::{DeviceRegistry, RegistryEvent, SharedDeviceRegistry};
pub use transport::{Connection, LineTransport, TcpConnector, TcpLineTransport, TransportConnector};
