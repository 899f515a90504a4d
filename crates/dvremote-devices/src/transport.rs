/*!
 * Line transport for device connections.
 *
 * A transport carries carriage-return terminated text lines over one
 * persistent connection. Sending is fire-and-forget and incoming lines arrive
 * on a channel handed out when the connection is opened.
 */
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::device::Result;
use crate::protocol::LINE_TERMINATOR;

/// Receiving side of a transport, one item per line
pub type IncomingLines = mpsc::UnboundedReceiver<String>;

/// Sending side of a line-oriented connection
pub trait LineTransport: Send + Sync + Debug {
    /// Queue text for transmission; failures are not reported to the caller
    fn send(&self, text: &str);

    /// Release the connection. No further lines are delivered afterwards.
    fn close(&self);
}

/// An opened connection
#[derive(Debug)]
pub struct Connection {
    /// Handle used to send and close
    pub transport: Arc<dyn LineTransport>,
    /// Lines received from the peer, in arrival order
    pub lines: IncomingLines,
}

/// Opens line transports
///
/// `connect` returns immediately; establishing the connection happens in the
/// background.
pub trait TransportConnector: Send + Sync + Debug {
    /// Open a connection to `address:port`
    fn connect(&self, address: IpAddr, port: u16) -> Result<Connection>;
}

/// Connector producing [`TcpLineTransport`]s
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Create a new TCP connector
    pub fn new() -> Self {
        Self
    }
}

impl TransportConnector for TcpConnector {
    fn connect(&self, address: IpAddr, port: u16) -> Result<Connection> {
        let peer = SocketAddr::new(address, port);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_connection(peer, outbound_rx, lines_tx, shutdown_rx));

        let transport = TcpLineTransport {
            peer,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        };

        Ok(Connection {
            transport: Arc::new(transport),
            lines: lines_rx,
        })
    }
}

/// Line transport over a TCP stream
#[derive(Debug)]
pub struct TcpLineTransport {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
}

impl LineTransport for TcpLineTransport {
    fn send(&self, text: &str) {
        if self.outbound.send(text.to_string()).is_err() {
            debug!("Dropping outbound text for closed connection to {}", self.peer);
        }
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Turn one raw frame into a line.
///
/// Only the text after the last newline counts, so the `\n` of a `\r\n`
/// pair and anything before a stray newline are dropped along with the
/// terminator.
fn frame_to_line(frame: &[u8]) -> String {
    let text = String::from_utf8_lossy(frame);
    let text = text.rsplit('\n').next().unwrap_or_default();
    text.strip_suffix(LINE_TERMINATOR).unwrap_or(text).to_string()
}

async fn run_connection(
    peer: SocketAddr,
    mut outbound: mpsc::UnboundedReceiver<String>,
    lines: mpsc::UnboundedSender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stream = tokio::select! {
        result = TcpStream::connect(peer) => match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to {}: {}", peer, e);
                return;
            }
        },
        _ = shutdown.changed() => {
            debug!("Connection to {} closed before it was established", peer);
            return;
        }
    };

    info!("Connected to {}", peer);

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut frame = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Closing connection to {}", peer);
                break;
            }
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = write_half.write_all(text.as_bytes()).await {
                        warn!("Failed to write to {}: {}", peer, e);
                        break;
                    }
                }
                None => {
                    debug!("Transport handle for {} dropped", peer);
                    break;
                }
            },
            // Partial reads stay in `frame` if another branch wins.
            read = reader.read_until(LINE_TERMINATOR as u8, &mut frame) => match read {
                Ok(0) => {
                    info!("Connection to {} closed by peer", peer);
                    break;
                }
                Ok(_) => {
                    if frame.last() != Some(&(LINE_TERMINATOR as u8)) {
                        // EOF inside a line; the next read reports it
                        continue;
                    }
                    let line = frame_to_line(&frame);
                    frame.clear();
                    if lines.send(line).is_err() {
                        debug!("No listener for lines from {}", peer);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from {}: {}", peer, e);
                    break;
                }
            },
        }
    }

    let _ = write_half.shutdown().await;
}
