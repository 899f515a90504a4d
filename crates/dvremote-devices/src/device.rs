/*!
 * DVR remote-control sessions.
 *
 * A [`DvrSession`] owns the connection to one device. It encodes commands
 * onto the connection and turns the device's unsolicited status lines into
 * [`SessionEvent`]s published on a broadcast channel.
 */
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use dvremote_core::config::SessionConfig;
use dvremote_core::logging::session_span;
use dvremote_core::types::Id;

use crate::discovery::{DeviceIdentity, ServiceDescriptor};
use crate::protocol::{Command, Response};
use crate::transport::{IncomingLines, LineTransport, TransportConnector};

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A required identity key is absent from the advertisement metadata
    #[error("Missing identity: metadata key {0} is absent or empty")]
    MissingIdentity(String),

    /// The advertisement carries no address to connect to
    #[error("Missing address for service {0}")]
    MissingAddress(String),

    /// The network browser failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Event published by a session
///
/// Serializes with the field names used on the device's event surface, e.g.
/// `{"event":"livetvready","isReady":true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum SessionEvent {
    /// The device reported a failure
    Error {
        /// Reason reported by the device
        reason: String,
    },
    /// Live TV is ready for further commands
    LiveTvReady {
        /// Always `true`
        #[serde(rename = "isReady")]
        is_ready: bool,
    },
    /// The tuned channel changed
    ChannelChange {
        /// Always `true`; failures arrive as [`SessionEvent::Error`]
        success: bool,
        /// Major channel number as sent by the device
        channel: String,
        /// Minor channel number, if reported
        #[serde(skip_serializing_if = "Option::is_none")]
        subchannel: Option<String>,
        /// What caused the change
        reason: String,
    },
}

impl SessionEvent {
    /// Short name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Error { .. } => "error",
            SessionEvent::LiveTvReady { .. } => "livetvready",
            SessionEvent::ChannelChange { .. } => "channelchange",
        }
    }
}

/// Publishing side of a session's events, emptied on teardown
type EventSlot = Arc<Mutex<Option<broadcast::Sender<SessionEvent>>>>;

/// Connection to one DVR
#[derive(Debug)]
pub struct DvrSession {
    identity: DeviceIdentity,
    transport: Arc<dyn LineTransport>,
    events: EventSlot,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DvrSession {
    /// Open a session for an advertised device.
    ///
    /// Derives the identity, opens a transport to the first address and
    /// starts listening for lines. Returns without waiting for the
    /// connection to be established. Must be called within a tokio runtime.
    pub fn open(
        descriptor: &ServiceDescriptor,
        connector: &dyn TransportConnector,
        config: &SessionConfig,
    ) -> Result<Self> {
        let identity = DeviceIdentity::from_descriptor(descriptor)?;
        let connection = connector.connect(identity.address, identity.port)?;
        let (event_sender, _) = broadcast::channel(config.event_capacity.max(1));

        let span = session_span(&identity.name, identity.id.as_str());
        let events: EventSlot = Arc::new(Mutex::new(Some(event_sender)));
        let listener = tokio::spawn(listen(connection.lines, events.clone()).instrument(span));

        debug!(
            "Opened session for {} ({}) at {}:{}",
            identity.name, identity.id, identity.address, identity.port
        );

        Ok(Self {
            identity,
            transport: connection.transport,
            events,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Send an infrared remote code, e.g. `UP` or `SELECT`
    pub fn send_ir_code(&self, code: &str) {
        self.send(&Command::IrCode(code.to_string()));
    }

    /// Send a keyboard code
    pub fn send_keyboard_code(&self, code: &str) {
        self.send(&Command::Keyboard(code.to_string()));
    }

    /// Jump to a named location in the UI
    pub fn teleport(&self, destination: &str) {
        self.send(&Command::Teleport(destination.to_string()));
    }

    /// Tune to `channel`. With `forced`, a recording in progress is cancelled.
    pub fn set_channel(&self, channel: &str, forced: bool) {
        self.send(&Command::channel(channel, forced));
    }

    /// Send a command. Nothing is reported back; watch the events instead.
    pub fn send(&self, command: &Command) {
        debug!(device = %self.identity.id, "Sending {}", command);
        self.transport.send(&command.encode());
    }

    /// Subscribe to events from this device
    ///
    /// Once the session is closed the receiver reports
    /// [`RecvError::Closed`](broadcast::error::RecvError::Closed) after any
    /// events still buffered for it.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        match lock(&self.events).as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Close the connection. No events are published afterwards.
    ///
    /// Calling this more than once is harmless.
    pub fn deinit(&self) {
        // Dropping the only sender closes every receiver. Taking it under the
        // lock also waits out a line that is being published right now.
        drop(lock(&self.events).take());

        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            debug!("Closing session for {} ({})", self.identity.name, self.identity.id);
            listener.abort();
            self.transport.close();
        }
    }

    /// Whether [`deinit`](Self::deinit) has been called
    pub fn is_closed(&self) -> bool {
        lock(&self.listener).is_none()
    }

    /// Friendly name of the device
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Unique identifier (serial number) of the device
    pub fn id(&self) -> &Id {
        &self.identity.id
    }

    /// Address the session is connected to
    pub fn ip_address(&self) -> IpAddr {
        self.identity.address
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn listen(mut lines: IncomingLines, events: EventSlot) {
    while let Some(line) = lines.recv().await {
        handle_incoming(&events, &line);
    }
    debug!("Line stream ended");
}

fn handle_incoming(events: &EventSlot, line: &str) {
    debug!("Incoming: {:?}", line);

    match Response::parse(line) {
        Response::InvalidCommand => warn!("Device could not parse the last command"),
        Response::Unrecognized => {}
        response => {
            if let Some(event) = response.into_event() {
                debug!("Publishing {} event", event.kind());
                if let Some(sender) = lock(events).as_ref() {
                    // No subscribers is fine
                    let _ = sender.send(event);
                }
            }
        }
    }
}
