pub mod grpc;
pub mod memory;
pub mod messages;
pub mod node;

use crate::chord::types::{Key, NodeId, NodeRef, Value};
use crate::error::ChordError;
use async_trait::async_trait;

/// The remote procedures a node can invoke on a peer.
///
/// Implementations apply their own timeout and report unreachable peers as
/// `ChordError::Network`, so callers can tell transient failures apart from
/// protocol errors returned by the remote node.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get_id(&self, addr: &str) -> Result<NodeId, ChordError>;

    async fn get_predecessor(&self, node: &NodeRef) -> Result<Option<NodeRef>, ChordError>;

    async fn get_successor(&self, node: &NodeRef) -> Result<Option<NodeRef>, ChordError>;

    async fn set_predecessor(&self, node: &NodeRef, pred: &NodeRef) -> Result<(), ChordError>;

    async fn set_successor(&self, node: &NodeRef, succ: &NodeRef) -> Result<(), ChordError>;

    async fn set_successor2(&self, node: &NodeRef, succ2: &NodeRef) -> Result<(), ChordError>;

    async fn notify(&self, node: &NodeRef, candidate: &NodeRef) -> Result<(), ChordError>;

    async fn closest_preceding_finger(&self, node: &NodeRef, id: &NodeId) -> Result<NodeRef, ChordError>;

    async fn find_successor(&self, node: &NodeRef, id: &NodeId) -> Result<NodeRef, ChordError>;

    async fn get_key(&self, node: &NodeRef, key: &Key) -> Result<Value, ChordError>;

    async fn get_backup_key(&self, node: &NodeRef, key: &Key) -> Result<Value, ChordError>;

    async fn put_key_val(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError>;

    async fn put_key_val_backup(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError>;

    async fn remove_key_val_backup(&self, node: &NodeRef, key: &Key, value: &Value) -> Result<(), ChordError>;

    async fn transfer_keys(&self, node: &NodeRef, from_id: &NodeId, to: &NodeRef) -> Result<(), ChordError>;

    async fn request_all_data(&self, node: &NodeRef) -> Result<(), ChordError>;
}
