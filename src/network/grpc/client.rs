use crate::chord::types::{Key, NodeId, NodeRef, Value};
use crate::error::{ChordError, NetworkError, StorageError};
use crate::network::messages::chord::{
    chord_node_client::ChordNodeClient, Empty, Id, KeyRequest, KeyValue, NodeInfo,
    TransferKeysRequest,
};
use crate::network::Transport;
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Response, Status};

/// [`Transport`] over tonic. Keeps one channel per peer address and drops it
/// once the peer stops answering.
#[derive(Debug)]
pub struct GrpcTransport {
    channels: Mutex<HashMap<String, Channel>>,
    timeout: Duration,
    width: usize,
}

impl GrpcTransport {
    pub fn new(timeout: Duration, width: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            timeout,
            width,
        }
    }

    async fn client(&self, addr: &str) -> Result<ChordNodeClient<Channel>, ChordError> {
        if let Some(channel) = self.channels.lock().await.get(addr).cloned() {
            return Ok(ChordNodeClient::new(channel));
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", addr))
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .tcp_nodelay(true);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        debug!("Connected to {}", addr);
        self.channels
            .lock()
            .await
            .insert(addr.to_string(), channel.clone());
        Ok(ChordNodeClient::new(channel))
    }

    async fn call<T, F, Fut>(&self, addr: &str, f: F) -> Result<T, ChordError>
    where
        F: FnOnce(ChordNodeClient<Channel>) -> Fut + Send,
        Fut: Future<Output = Result<Response<T>, Status>> + Send,
        T: Send,
    {
        let client = self.client(addr).await?;
        let error = match tokio::time::timeout(self.timeout, f(client)).await {
            Ok(Ok(response)) => return Ok(response.into_inner()),
            Ok(Err(status)) => from_status(addr, status),
            Err(_) => NetworkError::Timeout(addr.to_string()).into(),
        };

        if error.is_unreachable() {
            self.channels.lock().await.remove(addr);
        }
        Err(error)
    }

    fn node(&self, info: NodeInfo) -> Result<Option<NodeRef>, ChordError> {
        info.into_node_ref(self.width)
    }
}

/// Maps a status returned by a peer back onto the error it was raised for.
fn from_status(addr: &str, status: Status) -> ChordError {
    match status.code() {
        Code::NotFound => StorageError::KeyNotFound.into(),
        Code::FailedPrecondition => ChordError::NotPredecessor,
        Code::Aborted => ChordError::NoCandidate,
        Code::InvalidArgument => ChordError::InvalidNodeId(status.message().to_string()),
        Code::DeadlineExceeded | Code::Cancelled => NetworkError::Timeout(addr.to_string()).into(),
        Code::Unavailable | Code::Unknown => {
            NetworkError::PeerUnreachable(format!("{}: {}", addr, status.message())).into()
        }
        _ => ChordError::Remote(format!("{}: {}", addr, status.message())),
    }
}

fn kv(key: &Key, value: &Value) -> KeyValue {
    KeyValue::from((key, value))
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn get_id(&self, addr: &str) -> Result<NodeId, ChordError> {
        let id = self
            .call(addr, |mut c| async move { c.get_id(Empty {}).await })
            .await?;
        NodeId::from_slice(&id.id, self.width)
    }

    async fn get_predecessor(&self, node: &NodeRef) -> Result<Option<NodeRef>, ChordError> {
        let info = self
            .call(&node.addr, |mut c| async move { c.get_predecessor(Empty {}).await })
            .await?;
        self.node(info)
    }

    async fn get_successor(&self, node: &NodeRef) -> Result<Option<NodeRef>, ChordError> {
        let info = self
            .call(&node.addr, |mut c| async move { c.get_successor(Empty {}).await })
            .await?;
        self.node(info)
    }

    async fn set_predecessor(&self, node: &NodeRef, pred: &NodeRef) -> Result<(), ChordError> {
        let info = NodeInfo::from(pred);
        self.call(&node.addr, |mut c| async move { c.set_predecessor(info).await })
            .await
            .map(|_| ())
    }

    async fn set_successor(&self, node: &NodeRef, succ: &NodeRef) -> Result<(), ChordError> {
        let info = NodeInfo::from(succ);
        self.call(&node.addr, |mut c| async move { c.set_successor(info).await })
            .await
            .map(|_| ())
    }

    async fn set_successor2(&self, node: &NodeRef, succ2: &NodeRef) -> Result<(), ChordError> {
        let info = NodeInfo::from(succ2);
        self.call(&node.addr, |mut c| async move { c.set_successor2(info).await })
            .await
            .map(|_| ())
    }

    async fn notify(&self, node: &NodeRef, candidate: &NodeRef) -> Result<(), ChordError> {
        let info = NodeInfo::from(candidate);
        self.call(&node.addr, |mut c| async move { c.notify(info).await })
            .await
            .map(|_| ())
    }

    async fn closest_preceding_finger(&self, node: &NodeRef, id: &NodeId) -> Result<NodeRef, ChordError> {
        let request = Id { id: id.to_bytes() };
        let info = self
            .call(&node.addr, |mut c| async move { c.closest_preceding_finger(request).await })
            .await?;
        self.node(info)?.ok_or(ChordError::NoCandidate)
    }

    async fn find_successor(&self, node: &NodeRef, id: &NodeId) -> Result<NodeRef, ChordError> {
        let request = Id { id: id.to_bytes() };
        let info = self
            .call(&node.addr, |mut c| async move { c.find_successor(request).await })
            .await?;
        self.node(info)?
            .ok_or_else(|| ChordError::LookupFailed(format!("{} returned no successor", node)))
    }

    async fn get_key(&self, node: &NodeRef, key: &Key) -> Result<Value, ChordError> {
        let request = KeyRequest { key: key.0.clone() };
        let response = self
            .call(&node.addr, |mut c| async move { c.get_key(request).await })
            .await?;
        Ok(Value(response.value))
    }

    async fn get_backup_key(&self, node: &NodeRef, key: &Key) -> Result<Value, ChordError> {
        let request = KeyRequest { key: key.0.clone() };
        let response = self
            .call(&node.addr, |mut c| async move { c.get_backup_key(request).await })
            .await?;
        Ok(Value(response.value))
    }

    async fn put_key_val(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError> {
        let request = kv(key, value);
        self.call(&node.addr, |mut c| async move { c.put_key_val(request).await })
            .await
            .map(|_| ())
    }

    async fn put_key_val_backup(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError> {
        let request = kv(key, value);
        self.call(&node.addr, |mut c| async move { c.put_key_val_backup(request).await })
            .await
            .map(|_| ())
    }

    async fn remove_key_val_backup(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError> {
        let request = kv(key, value);
        self.call(&node.addr, |mut c| async move { c.remove_key_val_backup(request).await })
            .await
            .map(|_| ())
    }

    async fn transfer_keys(&self, node: &NodeRef, from_id: &NodeId, to: &NodeRef) -> Result<(), ChordError> {
        let request = TransferKeysRequest {
            from_id: from_id.to_bytes(),
            to_node: Some(NodeInfo::from(to)),
        };
        self.call(&node.addr, |mut c| async move { c.transfer_keys(request).await })
            .await
            .map(|_| ())
    }

    async fn request_all_data(&self, node: &NodeRef) -> Result<(), ChordError> {
        self.call(&node.addr, |mut c| async move { c.request_all_data(Empty {}).await })
            .await
            .map(|_| ())
    }
}
