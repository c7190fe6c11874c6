use crate::chord::types::{Key, NodeId, NodeRef, Value};
use crate::error::ChordError;
use crate::network::messages::chord::{KeyValue, NodeInfo};

impl From<&NodeRef> for NodeInfo {
    fn from(node: &NodeRef) -> Self {
        NodeInfo {
            node_id: node.id.to_bytes(),
            address: node.addr.clone(),
        }
    }
}

impl From<Option<NodeRef>> for NodeInfo {
    fn from(node: Option<NodeRef>) -> Self {
        node.as_ref().map(NodeInfo::from).unwrap_or_default()
    }
}

impl NodeInfo {
    /// Decodes the node, treating an empty id as the "no node" sentinel.
    pub fn into_node_ref(self, width: usize) -> Result<Option<NodeRef>, ChordError> {
        if self.node_id.is_empty() {
            return Ok(None);
        }
        let id = NodeId::from_slice(&self.node_id, width)?;
        Ok(Some(NodeRef::new(id, self.address)))
    }

    /// Like [`NodeInfo::into_node_ref`] but the node must be present.
    pub fn require_node_ref(self, width: usize) -> Result<NodeRef, ChordError> {
        self.into_node_ref(width)?
            .ok_or_else(|| ChordError::InvalidNodeId("missing node".into()))
    }
}

impl From<(&Key, &Value)> for KeyValue {
    fn from((key, value): (&Key, &Value)) -> Self {
        KeyValue {
            key: key.0.clone(),
            value: value.0.clone(),
        }
    }
}

impl From<KeyValue> for (Key, Value) {
    fn from(kv: KeyValue) -> Self {
        (Key(kv.key), Value(kv.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_node_info_is_the_none_sentinel() {
        let info = NodeInfo::from(None);
        assert!(info.node_id.is_empty());
        assert_eq!(info.into_node_ref(20).unwrap(), None);
    }

    #[test]
    fn node_info_checks_id_width() {
        let node = NodeRef::new(NodeId::from_u64(7, 2), "127.0.0.1:4000");
        let info = NodeInfo::from(&node);
        assert_eq!(info.clone().require_node_ref(2).unwrap(), node);
        assert!(matches!(info.into_node_ref(4), Err(ChordError::InvalidNodeId(_))));
    }
}
