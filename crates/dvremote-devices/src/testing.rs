//! In-memory transport used by the unit tests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::device::Result;
use crate::discovery::ServiceDescriptor;
use crate::transport::{Connection, LineTransport, TransportConnector};

pub(crate) fn descriptor(name: &str, tsn: &str) -> ServiceDescriptor {
    ServiceDescriptor {
        query: vec!["_tivo-remote._tcp.local".to_string()],
        full_name: format!("{}._tivo-remote._tcp.local", name),
        txt: vec![format!("TSN={}", tsn), "platform=tcd/Series5".to_string()],
        addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))],
        port: 31339,
    }
}

#[derive(Debug)]
pub(crate) struct MockTransport {
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
    lines: mpsc::UnboundedSender<String>,
}

impl MockTransport {
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn push_line(&self, line: &str) {
        let _ = self.lines.send(line.to_string());
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl LineTransport for MockTransport {
    fn send(&self, text: &str) {
        self.sent.lock().unwrap().push(text.to_string());
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    opened: Arc<Mutex<Vec<(IpAddr, u16, Arc<MockTransport>)>>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connections(&self) -> Vec<(IpAddr, u16)> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(address, port, _)| (*address, *port))
            .collect()
    }

    pub(crate) fn transport(&self, index: usize) -> Arc<MockTransport> {
        self.opened.lock().unwrap()[index].2.clone()
    }
}

impl TransportConnector for MockConnector {
    fn connect(&self, address: IpAddr, port: u16) -> Result<Connection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            lines: tx,
        });
        self.opened
            .lock()
            .unwrap()
            .push((address, port, transport.clone()));

        Ok(Connection {
            transport,
            lines: rx,
        })
    }
}
