use crate::chord::node::ChordNode;
use crate::chord::types::{Key, NodeId, NodeRef, Value};
use crate::error::{ChordError, StorageError};
use crate::network::messages::chord::{
    chord_node_server::ChordNode as ChordNodeService, Empty, Id, KeyRequest, KeyValue, NodeInfo,
    TransferKeysRequest, ValueResponse,
};
use log::debug;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Serves one [`ChordNode`] to its peers.
#[derive(Debug)]
pub struct ChordGrpcServer {
    node: Arc<ChordNode>,
}

impl ChordGrpcServer {
    pub fn new(node: Arc<ChordNode>) -> Self {
        Self { node }
    }

    fn width(&self) -> usize {
        self.node.config().id_bytes
    }

    fn node_ref(&self, info: NodeInfo) -> Result<NodeRef, Status> {
        info.require_node_ref(self.width()).map_err(to_status)
    }

    fn node_id(&self, id: Id) -> Result<NodeId, Status> {
        NodeId::from_slice(&id.id, self.width()).map_err(to_status)
    }
}

/// Encodes a local failure as a status the calling transport can decode.
///
/// Failures of this node's own outgoing calls are reported as internal so
/// the caller does not mistake them for this node being unreachable.
pub(crate) fn to_status(err: ChordError) -> Status {
    match err {
        ChordError::Storage(StorageError::KeyNotFound) => Status::not_found("key not found"),
        ChordError::NotPredecessor => Status::failed_precondition(err.to_string()),
        ChordError::NoCandidate => Status::aborted(err.to_string()),
        ChordError::InvalidNodeId(_) => Status::invalid_argument(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl ChordNodeService for ChordGrpcServer {
    async fn get_id(&self, _request: Request<Empty>) -> Result<Response<Id>, Status> {
        Ok(Response::new(Id {
            id: self.node.id().to_bytes(),
        }))
    }

    async fn get_predecessor(&self, _request: Request<Empty>) -> Result<Response<NodeInfo>, Status> {
        let pred = self.node.get_predecessor().await;
        Ok(Response::new(NodeInfo::from(pred)))
    }

    async fn get_successor(&self, _request: Request<Empty>) -> Result<Response<NodeInfo>, Status> {
        let succ = self.node.get_successor().await;
        Ok(Response::new(NodeInfo::from(&succ)))
    }

    async fn set_predecessor(&self, request: Request<NodeInfo>) -> Result<Response<Empty>, Status> {
        let pred = self.node_ref(request.into_inner())?;
        self.node.set_predecessor(pred).await;
        Ok(Response::new(Empty {}))
    }

    async fn set_successor(&self, request: Request<NodeInfo>) -> Result<Response<Empty>, Status> {
        let succ = self.node_ref(request.into_inner())?;
        self.node.set_successor(succ).await;
        Ok(Response::new(Empty {}))
    }

    async fn set_successor2(&self, request: Request<NodeInfo>) -> Result<Response<Empty>, Status> {
        let succ2 = self.node_ref(request.into_inner())?;
        self.node.set_successor2(succ2).await;
        Ok(Response::new(Empty {}))
    }

    async fn notify(&self, request: Request<NodeInfo>) -> Result<Response<Empty>, Status> {
        let candidate = self.node_ref(request.into_inner())?;
        debug!("Notify from {}", candidate);
        self.node.notify(candidate).await.map_err(to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn closest_preceding_finger(&self, request: Request<Id>) -> Result<Response<NodeInfo>, Status> {
        let id = self.node_id(request.into_inner())?;
        let node = self.node.closest_preceding_finger(&id).await.map_err(to_status)?;
        Ok(Response::new(NodeInfo::from(&node)))
    }

    async fn find_successor(&self, request: Request<Id>) -> Result<Response<NodeInfo>, Status> {
        let id = self.node_id(request.into_inner())?;
        let node = self.node.find_successor(&id).await.map_err(to_status)?;
        Ok(Response::new(NodeInfo::from(&node)))
    }

    async fn get_key(&self, request: Request<KeyRequest>) -> Result<Response<ValueResponse>, Status> {
        let key = Key(request.into_inner().key);
        let value = self.node.get_key(&key).await.map_err(to_status)?;
        Ok(Response::new(ValueResponse { value: value.0 }))
    }

    async fn get_backup_key(&self, request: Request<KeyRequest>) -> Result<Response<ValueResponse>, Status> {
        let key = Key(request.into_inner().key);
        let value = self.node.get_backup_key(&key).await.map_err(to_status)?;
        Ok(Response::new(ValueResponse { value: value.0 }))
    }

    async fn put_key_val(&self, request: Request<KeyValue>) -> Result<Response<Empty>, Status> {
        let (key, value): (Key, Value) = request.into_inner().into();
        self.node.put_key_val(key, value).await.map_err(to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn put_key_val_backup(&self, request: Request<KeyValue>) -> Result<Response<Empty>, Status> {
        let (key, value): (Key, Value) = request.into_inner().into();
        self.node
            .put_key_val_backup(key, value)
            .await
            .map_err(to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn remove_key_val_backup(&self, request: Request<KeyValue>) -> Result<Response<Empty>, Status> {
        let (key, value): (Key, Value) = request.into_inner().into();
        self.node
            .remove_key_val_backup(&key, &value)
            .await
            .map_err(to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn transfer_keys(&self, request: Request<TransferKeysRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        let from_id = self.node_id(Id { id: req.from_id })?;
        let to = self.node_ref(req.to_node.unwrap_or_default())?;
        self.node
            .transfer_keys(&from_id, &to)
            .await
            .map_err(to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn request_all_data(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.node.request_all_data().await;
        Ok(Response::new(Empty {}))
    }
}
