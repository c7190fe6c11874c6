use crate::chord::types::{Key, NodeRef};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;

/// Notable things that happen to a node's ring state.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    SuccessorChanged { old: NodeRef, new: NodeRef },
    Successor2Changed { new: NodeRef },
    PredecessorChanged { old: Option<NodeRef>, new: NodeRef },
    PredecessorCleared { failed: NodeRef },
    SuccessorFailed { failed: NodeRef, promoted: NodeRef },
    FingerUpdated { index: usize, node: NodeRef },
    KeysTransferred { count: usize, to: NodeRef },
    BackupPromoted { count: usize },
    ReplicationFailed { key: Key, target: NodeRef, error: String },
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::SuccessorChanged { old, new } => write!(f, "successor {} -> {}", old, new),
            NodeEvent::Successor2Changed { new } => write!(f, "successor2 -> {}", new),
            NodeEvent::PredecessorChanged { old: Some(old), new } => {
                write!(f, "predecessor {} -> {}", old, new)
            }
            NodeEvent::PredecessorChanged { old: None, new } => write!(f, "predecessor set to {}", new),
            NodeEvent::PredecessorCleared { failed } => write!(f, "predecessor {} cleared", failed),
            NodeEvent::SuccessorFailed { failed, promoted } => {
                write!(f, "successor {} failed, promoted {}", failed, promoted)
            }
            NodeEvent::FingerUpdated { index, node } => write!(f, "finger {} -> {}", index, node),
            NodeEvent::KeysTransferred { count, to } => write!(f, "transferred {} keys to {}", count, to),
            NodeEvent::BackupPromoted { count } => write!(f, "promoted {} backup keys", count),
            NodeEvent::ReplicationFailed { key, target, error } => {
                write!(f, "replicating {} to {} failed: {}", key, target, error)
            }
        }
    }
}

/// Per-node callback invoked on every [`NodeEvent`].
pub type EventHook = Arc<dyn Fn(&NodeRef, &NodeEvent) + Send + Sync>;

/// Hook used when none is supplied: writes the event to the log.
pub fn log_hook() -> EventHook {
    Arc::new(|node: &NodeRef, event: &NodeEvent| match event {
        NodeEvent::SuccessorFailed { .. }
        | NodeEvent::PredecessorCleared { .. }
        | NodeEvent::ReplicationFailed { .. } => warn!("[{}] {}", node.id, event),
        NodeEvent::FingerUpdated { .. } => log::debug!("[{}] {}", node.id, event),
        _ => info!("[{}] {}", node.id, event),
    })
}
