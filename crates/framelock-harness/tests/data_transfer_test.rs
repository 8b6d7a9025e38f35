//! Acknowledged data packages on the data-transfer connection.

use std::{
    net::TcpStream,
    sync::{Arc, Mutex, PoisonError},
};

use framelock_harness::{
    LoopbackCluster, TEST_TIMEOUT,
    codecs::{CounterCodec, RecordingCodec},
    wait_until,
};
use framelock_net::NetError;

fn recorder<T: Clone>() -> (Arc<Mutex<Vec<T>>>, impl Fn() -> Vec<T>) {
    let shared = Arc::new(Mutex::new(Vec::new()));
    let view = Arc::clone(&shared);
    (shared, move || view.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

#[test]
fn authority_package_reaches_follower_and_is_acknowledged() {
    let cluster = LoopbackCluster::builder().data_transfer().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();
    let (codec, recorded) = RecordingCodec::new();
    let follower = cluster.follower(1, codec).unwrap();

    let (packages, received) = recorder::<(i32, Vec<u8>)>();
    follower.set_data_handler(move |_, package_id, data| {
        packages.lock().unwrap().push((package_id, data.to_vec()));
    });
    let (acks, acknowledged) = recorder::<i32>();
    authority.set_data_ack_handler(move |_, package_id| acks.lock().unwrap().push(package_id));

    assert!(wait_until(TEST_TIMEOUT, || {
        authority.are_all_nodes_connected() && follower.are_all_nodes_connected()
    }));
    assert_eq!(authority.data_transfer_connections_count(), 1);
    assert_eq!(follower.data_transfer_connections_count(), 1);

    assert_eq!(authority.transfer_data(5, b"mesh"), 1);

    assert!(wait_until(TEST_TIMEOUT, || received() == vec![(5, b"mesh".to_vec())]));
    assert!(wait_until(TEST_TIMEOUT, || acknowledged() == vec![5]));

    // Packages stay out of the frame barrier.
    authority.pre_stage().unwrap();
    follower.pre_stage().unwrap();
    authority.post_stage().unwrap();
    assert_eq!(recorded.values(), vec![0]);
}

#[test]
fn follower_package_reaches_authority() {
    let cluster = LoopbackCluster::builder().data_transfer().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();
    let (packages, received) = recorder::<(usize, i32)>();
    authority.set_data_handler(move |connection, package_id, _| {
        packages.lock().unwrap().push((connection, package_id));
    });
    let follower = cluster.follower(1, RecordingCodec::default()).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || follower.are_all_nodes_connected()));

    let (acks, acknowledged) = recorder::<i32>();
    follower.set_data_ack_handler(move |_, package_id| acks.lock().unwrap().push(package_id));
    let data_connection = follower
        .connections()
        .iter()
        .find(|connection| connection.endpoint().port == cluster.data_port(1).unwrap())
        .map(framelock_net::Connection::id)
        .unwrap();
    follower.transfer_data_to(data_connection, 8, b"screenshot").unwrap();

    assert!(wait_until(TEST_TIMEOUT, || received().iter().any(|(_, id)| *id == 8)));
    assert!(wait_until(TEST_TIMEOUT, || acknowledged() == vec![8]));
}

#[test]
fn cluster_waits_for_data_transfer_connection() {
    let cluster = LoopbackCluster::builder().data_transfer().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();
    let (events, statuses) = recorder::<bool>();
    authority.set_data_status_handler(move |_, connected| events.lock().unwrap().push(connected));

    let _sync = TcpStream::connect(("127.0.0.1", cluster.sync_port(1))).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.sync_connections_count() == 1));
    assert!(!authority.are_all_nodes_connected());

    let data = TcpStream::connect(("127.0.0.1", cluster.data_port(1).unwrap())).unwrap();
    assert!(wait_until(TEST_TIMEOUT, || authority.are_all_nodes_connected()));
    assert_eq!(authority.data_transfer_connections_count(), 1);

    drop(data);
    assert!(wait_until(TEST_TIMEOUT, || authority.data_transfer_connections_count() == 0));
    assert!(wait_until(TEST_TIMEOUT, || statuses() == vec![true, false]));
    assert!(!authority.are_all_nodes_connected());
}

#[test]
fn transfer_to_unknown_connection_is_rejected() {
    let cluster = LoopbackCluster::builder().data_transfer().build();
    let authority = cluster.authority(CounterCodec::default()).unwrap();

    assert!(matches!(
        authority.transfer_data_to(0, 1, b"x"),
        Err(NetError::UnknownConnection { id: 0 })
    ));
    assert!(matches!(
        authority.transfer_data_to(42, 1, b"x"),
        Err(NetError::UnknownConnection { id: 42 })
    ));
    assert_eq!(authority.transfer_data(1, b"nobody listening"), 0);
}
