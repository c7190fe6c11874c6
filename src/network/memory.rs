use crate::chord::node::ChordNode;
use crate::chord::types::{Key, NodeId, NodeRef, Value};
use crate::error::{ChordError, NetworkError};
use crate::network::Transport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

/// In-process transport: dispatches calls straight to registered nodes.
///
/// Used to run whole rings inside one process. Unregistered or killed
/// addresses behave like unreachable peers.
#[derive(Debug)]
pub struct MemoryNetwork {
    nodes: RwLock<HashMap<String, Weak<ChordNode>>>,
    timeout: Duration,
}

impl MemoryNetwork {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            timeout,
        })
    }

    pub fn register(&self, node: &Arc<ChordNode>) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(node.local().addr.clone(), Arc::downgrade(node));
        }
    }

    /// Makes `node` unreachable for everybody else.
    pub fn kill(&self, node: &NodeRef) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.remove(&node.addr);
        }
    }

    fn resolve(&self, addr: &str) -> Result<Arc<ChordNode>, ChordError> {
        self.nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(addr).and_then(Weak::upgrade))
            .ok_or_else(|| NetworkError::PeerUnreachable(addr.to_string()).into())
    }

    async fn call<T, F, Fut>(&self, addr: &str, f: F) -> Result<T, ChordError>
    where
        F: FnOnce(Arc<ChordNode>) -> Fut + Send,
        Fut: Future<Output = Result<T, ChordError>> + Send,
        T: Send,
    {
        let node = self.resolve(addr)?;
        tokio::time::timeout(self.timeout, f(node))
            .await
            .map_err(|_| ChordError::from(NetworkError::Timeout(addr.to_string())))?
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn get_id(&self, addr: &str) -> Result<NodeId, ChordError> {
        self.call(addr, |n| async move { Ok(n.id().clone()) }).await
    }

    async fn get_predecessor(&self, node: &NodeRef) -> Result<Option<NodeRef>, ChordError> {
        self.call(&node.addr, |n| async move { Ok(n.get_predecessor().await) })
            .await
    }

    async fn get_successor(&self, node: &NodeRef) -> Result<Option<NodeRef>, ChordError> {
        self.call(&node.addr, |n| async move { Ok(Some(n.get_successor().await)) })
            .await
    }

    async fn set_predecessor(&self, node: &NodeRef, pred: &NodeRef) -> Result<(), ChordError> {
        let pred = pred.clone();
        self.call(&node.addr, |n| async move {
            n.set_predecessor(pred).await;
            Ok(())
        })
        .await
    }

    async fn set_successor(&self, node: &NodeRef, succ: &NodeRef) -> Result<(), ChordError> {
        let succ = succ.clone();
        self.call(&node.addr, |n| async move {
            n.set_successor(succ).await;
            Ok(())
        })
        .await
    }

    async fn set_successor2(&self, node: &NodeRef, succ2: &NodeRef) -> Result<(), ChordError> {
        let succ2 = succ2.clone();
        self.call(&node.addr, |n| async move {
            n.set_successor2(succ2).await;
            Ok(())
        })
        .await
    }

    async fn notify(&self, node: &NodeRef, candidate: &NodeRef) -> Result<(), ChordError> {
        let candidate = candidate.clone();
        self.call(&node.addr, |n| async move { n.notify(candidate).await })
            .await
    }

    async fn closest_preceding_finger(&self, node: &NodeRef, id: &NodeId) -> Result<NodeRef, ChordError> {
        let id = id.clone();
        self.call(&node.addr, |n| async move { n.closest_preceding_finger(&id).await })
            .await
    }

    async fn find_successor(&self, node: &NodeRef, id: &NodeId) -> Result<NodeRef, ChordError> {
        let id = id.clone();
        self.call(&node.addr, |n| async move { n.find_successor(&id).await })
            .await
    }

    async fn get_key(&self, node: &NodeRef, key: &Key) -> Result<Value, ChordError> {
        let key = key.clone();
        self.call(&node.addr, |n| async move { n.get_key(&key).await })
            .await
    }

    async fn get_backup_key(&self, node: &NodeRef, key: &Key) -> Result<Value, ChordError> {
        let key = key.clone();
        self.call(&node.addr, |n| async move { n.get_backup_key(&key).await })
            .await
    }

    async fn put_key_val(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError> {
        let (key, value) = (key.clone(), value.clone());
        self.call(&node.addr, |n| async move { n.put_key_val(key, value).await })
            .await
    }

    async fn put_key_val_backup(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError> {
        let (key, value) = (key.clone(), value.clone());
        self.call(&node.addr, |n| async move { n.put_key_val_backup(key, value).await })
            .await
    }

    async fn remove_key_val_backup(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError> {
        let (key, value) = (key.clone(), value.clone());
        self.call(&node.addr, |n| async move { n.remove_key_val_backup(&key, &value).await })
            .await
    }

    async fn transfer_keys(&self, node: &NodeRef, from_id: &NodeId, to: &NodeRef) -> Result<(), ChordError> {
        let (from_id, to) = (from_id.clone(), to.clone());
        self.call(&node.addr, |n| async move { n.transfer_keys(&from_id, &to).await })
            .await
    }

    async fn request_all_data(&self, node: &NodeRef) -> Result<(), ChordError> {
        self.call(&node.addr, |n| async move {
            n.request_all_data().await;
            Ok(())
        })
        .await
    }
}
