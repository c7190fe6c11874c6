use chordring::chord::types::{between, Key, NodeId, NodeRef, Value};
use chordring::config::NodeConfig;
use chordring::error::{ChordError, StorageError};
use chordring::network::grpc::client::GrpcTransport;
use chordring::network::grpc::PeerConfig;
use chordring::network::node::ChordPeer;
use chordring::network::Transport;
use std::time::Duration;

fn peer_config() -> PeerConfig {
    let node = NodeConfig::default()
        .with_backup_read_ratio(0.0)
        .with_rpc_timeout(Duration::from_millis(500))
        .with_intervals(
            Duration::from_millis(50),
            Duration::from_millis(20),
            Duration::from_millis(100),
        );
    PeerConfig {
        node,
        ..PeerConfig::default()
    }
}

async fn wait_until_linked(a: &ChordPeer, b: &ChordPeer) {
    for _ in 0..100 {
        let a_succ = a.node().get_successor().await;
        let b_succ = b.node().get_successor().await;
        let a_pred = a.node().get_predecessor().await;
        let b_pred = b.node().get_predecessor().await;
        if a_succ == *b.node().local()
            && b_succ == *a.node().local()
            && a_pred.as_ref() == Some(b.node().local())
            && b_pred.as_ref() == Some(a.node().local())
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("ring of two did not converge");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_peers_share_keys_over_grpc() {
    let mut a = ChordPeer::new(peer_config()).await.unwrap();
    a.create_network();

    let mut b = ChordPeer::new(peer_config()).await.unwrap();
    b.join(&a.addr().to_string()).await.unwrap();

    wait_until_linked(&a, &b).await;

    for i in 0..10 {
        let key = Key(format!("key-{}", i).into_bytes());
        b.node()
            .put_key_val(key, Value(format!("value-{}", i).into_bytes()))
            .await
            .unwrap();
    }

    for i in 0..10 {
        let key = Key(format!("key-{}", i).into_bytes());
        let expected = Value(format!("value-{}", i).into_bytes());
        assert_eq!(a.node().get_key(&key).await.unwrap(), expected);
        assert_eq!(b.node().get_key(&key).await.unwrap(), expected);
    }

    let missing = Key::from("never-written");
    assert_eq!(
        a.node().get_key(&missing).await,
        Err(ChordError::Storage(StorageError::KeyNotFound))
    );

    b.shutdown().await;
    a.shutdown().await;
}

#[tokio::test]
async fn joining_an_absent_parent_fails() {
    let mut peer = ChordPeer::new(peer_config()).await.unwrap();
    let result = peer.join("127.0.0.1:1").await;
    assert!(result.is_err());
    peer.shutdown().await;
}

/// A node that is never started; only its reference travels over the wire.
fn absent(id: NodeId) -> NodeRef {
    NodeRef::new(id, "127.0.0.1:1")
}

#[tokio::test]
async fn every_procedure_round_trips_over_grpc() {
    let mut peer = ChordPeer::new(peer_config()).await.unwrap();
    let mut other = ChordPeer::new(peer_config()).await.unwrap();
    let transport = GrpcTransport::new(Duration::from_secs(2), 20);
    let node = peer.node().clone();
    let target = node.local().clone();
    let self_id = node.id().clone();

    // identity and a fresh singleton ring
    assert_eq!(transport.get_id(&peer.addr().to_string()).await.unwrap(), self_id);
    assert_eq!(transport.get_predecessor(&target).await.unwrap(), None);
    assert_eq!(transport.get_successor(&target).await.unwrap(), Some(target.clone()));
    let ahead = self_id.add_power_of_two(40);
    assert_eq!(transport.closest_preceding_finger(&target, &ahead).await.unwrap(), target);
    assert_eq!(transport.find_successor(&target, &ahead).await.unwrap(), target);

    // notify: accepted while unset, then the acceptance rule applies
    let far = absent(self_id.add_power_of_two(100));
    let near = absent(self_id.add_power_of_two(0));
    transport.notify(&target, &far).await.unwrap();
    assert_eq!(node.get_predecessor().await, Some(far.clone()));
    assert_eq!(transport.notify(&target, &near).await, Err(ChordError::NotPredecessor));
    assert_eq!(transport.get_predecessor(&target).await.unwrap(), Some(far.clone()));

    // unconditional setters
    let other_ref = other.node().local().clone();
    transport.set_successor2(&target, &other_ref).await.unwrap();
    assert_eq!(node.get_successor2().await, Some(other_ref.clone()));
    transport.set_successor(&target, &other_ref).await.unwrap();
    assert_eq!(transport.get_successor(&target).await.unwrap(), Some(other_ref.clone()));
    transport.set_successor(&target, &target).await.unwrap();
    transport.set_predecessor(&target, &near).await.unwrap();
    assert_eq!(node.get_predecessor().await, Some(near.clone()));
    transport.set_predecessor(&target, &far).await.unwrap();

    // primary data and its backup on the node itself
    let keys: Vec<Key> = (0..30).map(|i| Key(format!("rt-{}", i).into_bytes())).collect();
    for k in &keys {
        transport.put_key_val(&target, k, &Value::from("v")).await.unwrap();
    }
    for k in &keys {
        assert_eq!(transport.get_key(&target, k).await.unwrap(), Value::from("v"));
        assert_eq!(transport.get_backup_key(&target, k).await.unwrap(), Value::from("v"));
    }
    let missing = Key::from("missing");
    assert_eq!(
        transport.get_key(&target, &missing).await,
        Err(ChordError::Storage(StorageError::KeyNotFound))
    );

    // backup maintenance
    let extra = Key::from("extra");
    transport.put_key_val_backup(&target, &extra, &Value::from("b")).await.unwrap();
    assert_eq!(transport.get_backup_key(&target, &extra).await.unwrap(), Value::from("b"));
    transport.remove_key_val_backup(&target, &extra, &Value::from("b")).await.unwrap();
    assert_eq!(
        transport.get_backup_key(&target, &extra).await,
        Err(ChordError::Storage(StorageError::KeyNotFound))
    );

    // transfer (far, from_id] to the other peer
    let from_id = self_id.add_power_of_two(159);
    transport.transfer_keys(&target, &from_id, &other_ref).await.unwrap();
    for k in &keys {
        let moved = between(&far.id, &NodeId::from_key(k, 20), &from_id, false, true);
        assert_eq!(node.storage().get(k).await.is_err(), moved, "{}", k);
        assert_eq!(other.node().storage().get(k).await.is_ok(), moved, "{}", k);
    }

    // request_all_data rebuilds the backup from what is left
    node.storage().clear_backup().await;
    transport.request_all_data(&target).await.unwrap();
    assert_eq!(node.storage().backup_len().await, node.storage().len().await);

    // identifiers of the wrong width are rejected by the server
    let narrow = GrpcTransport::new(Duration::from_secs(2), 4);
    let result = narrow.find_successor(&target, &NodeId::from_u64(7, 4)).await;
    assert!(matches!(result, Err(ChordError::InvalidNodeId(_))));

    other.shutdown().await;
    peer.shutdown().await;
}
