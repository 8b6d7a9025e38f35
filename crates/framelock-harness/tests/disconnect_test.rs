//! Peer loss and reconnection accounting.

use std::{io::Write, net::TcpStream};

use framelock_harness::{
    LoopbackCluster, TEST_TIMEOUT,
    codecs::{CounterCodec, RecordingCodec},
    wait_until,
};

#[test]
fn follower_stops_running_when_authority_leaves() {
    let cluster = LoopbackCluster::builder().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();
    let follower = cluster.follower(1, RecordingCodec::default()).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.are_all_nodes_connected()));
    assert!(follower.is_running());

    authority.close();

    assert!(wait_until(TEST_TIMEOUT, || !follower.is_running()));
    assert_eq!(follower.sync_connections_count(), 0);
    assert_eq!(follower.pre_stage().unwrap(), None);
}

#[test]
fn authority_forgets_departed_follower_and_accepts_replacement() {
    let cluster = LoopbackCluster::builder().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();
    let follower = cluster.follower(1, RecordingCodec::default()).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));

    follower.close();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 0));
    assert!(authority.is_running());
    assert!(!authority.are_all_nodes_connected());

    // No peers left; the barrier is trivially satisfied.
    authority.pre_stage().unwrap();
    authority.post_stage().unwrap();

    let (codec, recorded) = RecordingCodec::new();
    let replacement = cluster.follower(1, codec).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.are_all_nodes_connected()));
    assert_eq!(authority.connections()[0].session_number(), 2);

    authority.pre_stage().unwrap();
    replacement.pre_stage().unwrap();
    authority.post_stage().unwrap();
    assert_eq!(recorded.values().len(), 1);
}

#[test]
fn replacement_follower_accepts_wrapped_frame_zero() {
    let cluster = LoopbackCluster::builder().sync_config(|c| c.with_frame_ceiling(2)).build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();
    let follower = cluster.follower(1, RecordingCodec::default()).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.are_all_nodes_connected()));

    authority.pre_stage().unwrap();
    follower.pre_stage().unwrap();
    authority.post_stage().unwrap();
    let connections = authority.connections();
    assert_eq!(connections[0].frame_numbers(), (1, [1, 1]));

    follower.close();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 0));

    let (codec, recorded) = RecordingCodec::new();
    let replacement = cluster.follower(1, codec).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.are_all_nodes_connected()));

    // Ceiling 2 wraps the next frame number to 0.
    authority.pre_stage().unwrap();
    replacement.pre_stage().unwrap();
    authority.post_stage().unwrap();

    assert_eq!(recorded.values(), vec![1]);
    assert_eq!(connections[0].frame_numbers(), (0, [0, 0]));
}

#[test]
fn abrupt_socket_close_is_noticed() {
    let cluster = LoopbackCluster::builder().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();

    let mut peer = TcpStream::connect(("127.0.0.1", cluster.sync_port(1))).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));

    peer.write_all(&[0x12]).unwrap();
    drop(peer);

    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 0));
    assert!(authority.is_running());
}

#[test]
fn close_is_idempotent() {
    let cluster = LoopbackCluster::builder().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();

    authority.close();
    authority.close();

    assert!(!authority.is_running());
    assert!(authority.connections().is_empty());
}
