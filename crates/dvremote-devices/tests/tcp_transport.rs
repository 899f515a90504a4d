//! Drives a session over real TCP against a local listener standing in for a DVR.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use dvremote_core::config::SessionConfig;
use dvremote_devices::{
    DeviceRegistry, DvrSession, RegistryEvent, ServiceDescriptor, SessionEvent, TcpConnector,
};

fn local_descriptor(port: u16) -> ServiceDescriptor {
    ServiceDescriptor {
        query: vec!["_tivo-remote._tcp.local".to_string()],
        full_name: "Test DVR._tivo-remote._tcp.local".to_string(),
        txt: vec!["TSN=8480001234567890".to_string()],
        addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        port,
    }
}

async fn read_exact_text(stream: &mut tokio::net::TcpStream, len: usize) -> String {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("data within timeout")
        .expect("read succeeds");
    String::from_utf8(buf).unwrap()
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

#[test_log::test(tokio::test)]
async fn session_round_trip_over_tcp() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let session = DvrSession::open(&local_descriptor(port), &TcpConnector::new(), &SessionConfig::default())
        .unwrap();
    let mut events = session.subscribe();

    // Commands queued before the connection is up are still delivered.
    session.set_channel("5", false);

    let (mut dvr, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(read_exact_text(&mut dvr, "SETCH 5\r".len()).await, "SETCH 5\r");

    session.send_ir_code("SELECT");
    assert_eq!(read_exact_text(&mut dvr, "IRCODE SELECT\r".len()).await, "IRCODE SELECT\r");

    dvr.write_all(b"GARBAGE\r\nCH_STATUS 0005 REMOTE\r\nCH_FAI").await.unwrap();
    dvr.write_all(b"LED recording\r").await.unwrap();
    dvr.flush().await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::ChannelChange {
            success: true,
            channel: "0005".into(),
            subchannel: None,
            reason: "REMOTE".into(),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Error {
            reason: "recording".into()
        }
    );

    session.deinit();

    // The device sees the connection close.
    let mut rest = Vec::new();
    let read = timeout(Duration::from_secs(2), dvr.read_to_end(&mut rest))
        .await
        .expect("peer closes");
    assert!(read.is_ok());
    assert!(rest.is_empty());
}

#[tokio::test]
async fn registry_opens_sessions_over_tcp() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let registry = DeviceRegistry::new(Arc::new(TcpConnector::new()));
    let mut found = registry.subscribe();

    registry.handle_advertisement(&local_descriptor(port)).unwrap();

    let session = match found.try_recv().unwrap() {
        RegistryEvent::DeviceFound(session) => session,
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(session.name(), "Test DVR");
    assert_eq!(session.id().as_str(), "8480001234567890");

    let (mut dvr, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();

    session.teleport("LIVETV");
    assert_eq!(read_exact_text(&mut dvr, "TELEPORT LIVETV\r".len()).await, "TELEPORT LIVETV\r");

    let mut events = session.subscribe();
    dvr.write_all(b"LIVETV_READY\r").await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::LiveTvReady { is_ready: true });

    registry.shutdown().unwrap();
    assert!(session.is_closed());
}
