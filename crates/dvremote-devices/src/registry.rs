/*!
 * Device registry for dvremote.
 *
 * The registry consumes browser notifications, opens a [`DvrSession`] for
 * every advertised DVR and keeps the live sessions keyed by serial number.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dvremote_core::config::{Config, SessionConfig};
use dvremote_core::types::Id;

use crate::device::{DeviceError, DvrSession, Result};
use crate::discovery::{BrowserEvent, DeviceIdentity, ServiceBrowser, ServiceDescriptor};
use crate::transport::TransportConnector;

/// Event types for the device registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device was advertised and a session opened for it
    DeviceFound(Arc<DvrSession>),
    /// A device was withdrawn and its session closed
    DeviceLost(Arc<DvrSession>),
}

/// Device registry
#[derive(Debug)]
pub struct DeviceRegistry {
    /// Live sessions by device serial
    devices: RwLock<HashMap<Id, Arc<DvrSession>>>,
    /// Event sender for registry events
    event_sender: broadcast::Sender<RegistryEvent>,
    /// Opens the transport for each new session
    connector: Arc<dyn TransportConnector>,
    /// Required prefix of an advertisement's first query term
    service_type: String,
    /// Settings applied to every session
    session_config: SessionConfig,
}

impl DeviceRegistry {
    /// Create a new device registry with default settings
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self::with_config(connector, &Config::default())
    }

    /// Create a new device registry from a loaded configuration
    pub fn with_config(connector: Arc<dyn TransportConnector>, config: &Config) -> Self {
        let (event_sender, _) = broadcast::channel(config.discovery.event_capacity.max(1));
        Self {
            devices: RwLock::new(HashMap::new()),
            event_sender,
            connector,
            service_type: config.discovery.service_type.clone(),
            session_config: config.session.clone(),
        }
    }

    fn read_devices(&self) -> Result<RwLockReadGuard<'_, HashMap<Id, Arc<DvrSession>>>> {
        self.devices.read().map_err(|_| {
            DeviceError::Other("Failed to acquire read lock on device registry".to_string())
        })
    }

    fn write_devices(&self) -> Result<RwLockWriteGuard<'_, HashMap<Id, Arc<DvrSession>>>> {
        self.devices.write().map_err(|_| {
            DeviceError::Other("Failed to acquire write lock on device registry".to_string())
        })
    }

    /// Handle a service advertisement.
    ///
    /// Advertisements for other service types are ignored and return
    /// `Ok(None)`. Otherwise a session is opened, stored under its serial and
    /// announced with [`RegistryEvent::DeviceFound`]. A session already stored
    /// under the same serial is closed and replaced.
    pub fn handle_advertisement(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<Option<Arc<DvrSession>>> {
        if !descriptor.matches_service_type(&self.service_type) {
            debug!(
                "Ignoring advertisement {} with query {:?}",
                descriptor.full_name, descriptor.query
            );
            return Ok(None);
        }

        let session = Arc::new(DvrSession::open(
            descriptor,
            self.connector.as_ref(),
            &self.session_config,
        )?);

        let stale = self
            .write_devices()?
            .insert(session.id().clone(), session.clone());

        if let Some(stale) = stale {
            debug!("Replacing existing session for {}", stale.id());
            stale.deinit();
        }

        info!(
            "Found device {} ({}) at {}",
            session.name(),
            session.id(),
            session.ip_address()
        );
        let _ = self
            .event_sender
            .send(RegistryEvent::DeviceFound(session.clone()));

        Ok(Some(session))
    }

    /// Handle a service withdrawal.
    ///
    /// Closes and removes the matching session and announces it with
    /// [`RegistryEvent::DeviceLost`]. Unknown devices return `Ok(None)`.
    pub fn handle_withdrawal(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<Option<Arc<DvrSession>>> {
        if !descriptor.matches_service_type(&self.service_type) {
            return Ok(None);
        }

        let id = DeviceIdentity::from_descriptor(descriptor)?.id;
        let Some(session) = self.write_devices()?.remove(&id) else {
            debug!("Withdrawal for unknown device {}", id);
            return Ok(None);
        };

        session.deinit();
        info!("Lost device {} ({})", session.name(), session.id());
        let _ = self
            .event_sender
            .send(RegistryEvent::DeviceLost(session.clone()));

        Ok(Some(session))
    }

    /// Process browser notifications until the channel closes.
    ///
    /// Browsing is started with [`ServiceBrowser::discover`] when the browser
    /// reports that it is ready. Failures for individual advertisements are
    /// logged and do not stop the loop.
    pub async fn run(&self, browser: &dyn ServiceBrowser, mut events: mpsc::Receiver<BrowserEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BrowserEvent::Ready => {
                    debug!("Browser ready, starting discovery for {}", self.service_type);
                    if let Err(e) = browser.discover() {
                        warn!("Failed to start discovery: {}", e);
                    }
                }
                BrowserEvent::ServiceUp(descriptor) => {
                    if let Err(e) = self.handle_advertisement(&descriptor) {
                        warn!("Dropping advertisement {}: {}", descriptor.full_name, e);
                    }
                }
                BrowserEvent::ServiceDown(descriptor) => {
                    if let Err(e) = self.handle_withdrawal(&descriptor) {
                        warn!("Dropping withdrawal {}: {}", descriptor.full_name, e);
                    }
                }
            }
        }
        debug!("Browser event stream ended");
    }

    /// Get a device by ID
    pub fn get_device(&self, id: &Id) -> Result<Arc<DvrSession>> {
        self.read_devices()?
            .get(id)
            .cloned()
            .ok_or_else(|| DeviceError::Other(format!("Device with ID {} not found", id)))
    }

    /// Get all live sessions
    pub fn get_devices(&self) -> Result<Vec<Arc<DvrSession>>> {
        Ok(self.read_devices()?.values().cloned().collect())
    }

    /// Get all device IDs
    pub fn get_device_ids(&self) -> Result<Vec<Id>> {
        Ok(self.read_devices()?.keys().cloned().collect())
    }

    /// Count registered devices
    pub fn count_devices(&self) -> Result<usize> {
        Ok(self.read_devices()?.len())
    }

    /// Check if a device is registered
    pub fn has_device(&self, id: &Id) -> Result<bool> {
        Ok(self.read_devices()?.contains_key(id))
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Close every session and empty the table
    pub fn shutdown(&self) -> Result<()> {
        let sessions: Vec<_> = self.write_devices()?.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.deinit();
        }
        info!("Closed {} device sessions", sessions.len());
        Ok(())
    }
}

/// A shared device registry that can be cloned
#[derive(Debug, Clone)]
pub struct SharedDeviceRegistry(Arc<DeviceRegistry>);

impl SharedDeviceRegistry {
    /// Create a new shared device registry
    pub fn new(registry: DeviceRegistry) -> Self {
        Self(Arc::new(registry))
    }

    /// Get a reference to the device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.0
    }

    /// Run the registry on its own task
    pub fn spawn(
        &self,
        browser: Arc<dyn ServiceBrowser>,
        events: mpsc::Receiver<BrowserEvent>,
    ) -> JoinHandle<()> {
        let registry = self.0.clone();
        tokio::spawn(async move { registry.run(browser.as_ref(), events).await })
    }
}

impl AsRef<DeviceRegistry> for SharedDeviceRegistry {
    fn as_ref(&self) -> &DeviceRegistry {
        self.registry()
    }
}
