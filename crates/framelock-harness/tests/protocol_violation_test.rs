//! Malformed traffic and size hints on real sockets.

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::{Arc, Weak},
};

use framelock_core::{ConnectionKind, SyncConfig};
use framelock_harness::{
    LoopbackCluster, ObservedEvent, RecordingObserver, TEST_TIMEOUT,
    codecs::{CounterCodec, RecordingCodec},
    wait_until,
};
use framelock_net::{Connection, ConnectionObserver, Endpoint};
use framelock_proto::{Frame, FrameDecoder, SyncPayload};

fn read_frame(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> Frame {
    let mut chunk = [0u8; 256];
    loop {
        if let Some(frame) = decoder.decode().unwrap() {
            return frame;
        }
        let read = stream.read(&mut chunk).unwrap();
        assert!(read > 0, "peer closed before a full frame arrived");
        decoder.extend(&chunk[..read]);
    }
}

#[test]
fn huge_declared_length_closes_connection() {
    let cluster = LoopbackCluster::builder().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();

    let mut peer = TcpStream::connect(("127.0.0.1", cluster.sync_port(1))).unwrap();
    peer.set_read_timeout(Some(TEST_TIMEOUT)).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));

    peer.write_all(&[0x11, 0xff, 0xff, 0xff, 0x7f]).unwrap();

    // Only the all-connected announcement may precede the close.
    let mut rest = Vec::new();
    if peer.read_to_end(&mut rest).is_ok() {
        assert!(rest.is_empty() || rest == Frame::connected().to_bytes().to_vec());
    }
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 0));

    // The listener keeps accepting.
    let follower = cluster.follower(1, RecordingCodec::default()).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));
    follower.close();
}

#[test]
fn unknown_tag_closes_connection() {
    let cluster = LoopbackCluster::builder().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();

    let mut peer = TcpStream::connect(("127.0.0.1", cluster.sync_port(1))).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));

    peer.write_all(&[0x7f, 0, 0, 0, 0]).unwrap();

    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 0));
}

#[test]
fn peer_closing_mid_message_ends_session_cleanly() {
    let cluster = LoopbackCluster::builder().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();

    let mut peer = TcpStream::connect(("127.0.0.1", cluster.sync_port(1))).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));

    // Sync header promising 8 bytes, followed by only 3 of them.
    peer.write_all(&[17, 8, 0, 0, 0, 1, 0, 0]).unwrap();
    drop(peer);
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 0));

    let _next = TcpStream::connect(("127.0.0.1", cluster.sync_port(1))).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));
    assert_eq!(authority.connections()[0].session_number(), 2);
}

#[test]
fn follower_connection_applies_size_hint_then_state() {
    let authority = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = authority.local_addr().unwrap().port();

    let observer = Arc::new(RecordingObserver::new());
    let weak = Arc::downgrade(&observer);
    let weak: Weak<dyn ConnectionObserver> = weak;
    let connection = Connection::client(
        Endpoint::sync(0, "127.0.0.1", port),
        SyncConfig::default().with_initial_buffer_size(16),
        weak,
    );
    connection.connect().unwrap();
    let (mut peer, _) = authority.accept().unwrap();

    assert_eq!(connection.kind(), ConnectionKind::Sync);
    assert!(!connection.is_server());
    assert!(connection.is_connected());

    let state = vec![7u8; 4096];
    peer.write_all(&Frame::size_hint(4096).to_bytes()).unwrap();
    peer.write_all(&Frame::sync(1, &state).unwrap().to_bytes()).unwrap();

    assert!(observer.wait_for(TEST_TIMEOUT, |event| *event == ObservedEvent::Published(1)));
    let events = observer.events();
    let hint = events.iter().position(|event| *event == ObservedEvent::SizeHint(4096));
    let decode = events
        .iter()
        .position(|event| *event == ObservedEvent::Decode { frame_number: 1, state: state.clone() });
    assert!(hint.is_some() && decode.is_some());
    assert!(hint < decode);

    assert!(connection.is_updated());
    connection.acknowledge().unwrap();

    let mut decoder = FrameDecoder::new(64, 1024);
    let ack = read_frame(&mut peer, &mut decoder);
    let payload = SyncPayload::parse(ack.payload()).unwrap();
    assert_eq!(payload.frame_number, 1);
    assert!(payload.is_acknowledge());

    connection.shutdown();
    assert!(!connection.is_connected());
}

#[test]
fn disconnect_message_ends_follower_session() {
    let authority = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = authority.local_addr().unwrap().port();

    let observer = Arc::new(RecordingObserver::new());
    let weak = Arc::downgrade(&observer);
    let weak: Weak<dyn ConnectionObserver> = weak;
    let connection = Connection::client(Endpoint::sync(0, "127.0.0.1", port), SyncConfig::default(), weak);
    connection.connect().unwrap();
    let (mut peer, _) = authority.accept().unwrap();

    peer.write_all(&Frame::disconnect().to_bytes()).unwrap();

    let status_changes = || {
        observer.events().iter().filter(|event| **event == ObservedEvent::StatusChanged).count()
    };
    assert!(wait_until(TEST_TIMEOUT, || status_changes() == 2));
    assert!(!connection.is_connected());
}
