use crate::chord::events::{log_hook, EventHook, NodeEvent};
use crate::chord::routing::FingerTable;
use crate::chord::storage::DataStore;
use crate::chord::types::{between, Key, NodeId, NodeRef, Value};
use crate::config::NodeConfig;
use crate::error::ChordError;
use crate::network::Transport;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// How `GetKey` requests are split between the owner's primary copy and the
/// backup copy held by the owner's successor.
///
/// Reads routed to the backup trade freshness for throughput: right after a
/// topology change the backup may not be synchronized yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadPolicy {
    backup_ratio: f64,
}

impl ReadPolicy {
    pub fn new(backup_ratio: f64) -> Result<Self, ChordError> {
        if !(0.0..=1.0).contains(&backup_ratio) {
            return Err(ChordError::InvalidConfig(format!(
                "backup read ratio must be within [0, 1], got {}",
                backup_ratio
            )));
        }
        Ok(Self { backup_ratio })
    }

    pub fn primary_only() -> Self {
        Self { backup_ratio: 0.0 }
    }

    pub fn backup_only() -> Self {
        Self { backup_ratio: 1.0 }
    }

    pub fn backup_ratio(&self) -> f64 {
        self.backup_ratio
    }

    /// Weighted coin flip for a single request.
    pub fn route_to_backup(&self) -> bool {
        self.backup_ratio > 0.0 && rand::random::<f64>() < self.backup_ratio
    }
}

/// A single member of the ring.
///
/// Each piece of mutable state sits behind its own lock so RPC handlers and
/// the maintenance workers never contend on a node-wide lock. Ring state,
/// fingers and storage locks are never held across a remote procedure; the
/// read policy lock is, so a local write and its replication finish before a
/// read can be routed to the backup.
pub struct ChordNode {
    local: NodeRef,
    config: NodeConfig,
    predecessor: RwLock<Option<NodeRef>>,
    successor: RwLock<NodeRef>,
    successor2: RwLock<Option<NodeRef>>,
    finger_table: RwLock<FingerTable>,
    next_finger: AtomicUsize,
    storage: DataStore,
    read_policy: RwLock<ReadPolicy>,
    transport: Arc<dyn Transport>,
    event_hook: EventHook,
}

impl fmt::Debug for ChordNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChordNode").field("local", &self.local).finish()
    }
}

/// Point-in-time view of a node, used for debug dumps.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub local: NodeRef,
    pub predecessor: Option<NodeRef>,
    pub successor: NodeRef,
    pub successor2: Option<NodeRef>,
    pub fingers: Vec<(usize, NodeRef)>,
    pub primary: Vec<(Key, Value)>,
    pub backup: Vec<(Key, Value)>,
}

impl fmt::Display for NodeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |n: &Option<NodeRef>| n.as_ref().map_or("<none>".to_string(), |n| n.to_string());
        writeln!(f, "node {}", self.local)?;
        writeln!(f, "  predecessor: {}", show(&self.predecessor))?;
        writeln!(f, "  successor:   {}", self.successor)?;
        writeln!(f, "  successor2:  {}", show(&self.successor2))?;
        let mut last: Option<&NodeRef> = None;
        for (index, node) in &self.fingers {
            if last != Some(node) {
                writeln!(f, "  finger {:>3}: {}", index, node)?;
            }
            last = Some(node);
        }
        writeln!(f, "  primary keys: {}", self.primary.len())?;
        for (k, v) in &self.primary {
            writeln!(f, "    {} = {}", k, String::from_utf8_lossy(&v.0))?;
        }
        write!(f, "  backup keys: {}", self.backup.len())
    }
}

impl ChordNode {
    /// Creates a node forming a ring on its own: it is its own successor and
    /// has no predecessor until somebody notifies it.
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self, ChordError> {
        config.validate()?;
        let id = config.node_id()?;
        let local = NodeRef::new(id.clone(), config.addr.clone());
        let read_policy = ReadPolicy::new(config.backup_read_ratio)?;

        Ok(Self {
            predecessor: RwLock::new(None),
            successor: RwLock::new(local.clone()),
            successor2: RwLock::new(None),
            finger_table: RwLock::new(FingerTable::new(id)),
            next_finger: AtomicUsize::new(0),
            storage: DataStore::new(),
            read_policy: RwLock::new(read_policy),
            transport,
            event_hook: log_hook(),
            local,
            config,
        })
    }

    pub fn with_event_hook(mut self, hook: EventHook) -> Self {
        self.event_hook = hook;
        self
    }

    pub fn local(&self) -> &NodeRef {
        &self.local
    }

    pub fn id(&self) -> &NodeId {
        &self.local.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn storage(&self) -> &DataStore {
        &self.storage
    }

    fn width(&self) -> usize {
        self.config.id_bytes
    }

    fn emit(&self, event: NodeEvent) {
        (self.event_hook)(&self.local, &event);
    }

    // Ring state accessors

    pub async fn get_predecessor(&self) -> Option<NodeRef> {
        self.predecessor.read().await.clone()
    }

    pub async fn get_successor(&self) -> NodeRef {
        self.successor.read().await.clone()
    }

    pub async fn get_successor2(&self) -> Option<NodeRef> {
        self.successor2.read().await.clone()
    }

    pub async fn set_predecessor(&self, pred: NodeRef) {
        let old = self.predecessor.write().await.replace(pred.clone());
        if old.as_ref() != Some(&pred) {
            self.emit(NodeEvent::PredecessorChanged { old, new: pred });
        }
    }

    pub async fn set_successor(&self, succ: NodeRef) {
        let old = std::mem::replace(&mut *self.successor.write().await, succ.clone());
        if succ != self.local {
            self.finger_table.write().await.update_finger(0, succ.clone());
        }
        if old != succ {
            self.emit(NodeEvent::SuccessorChanged { old, new: succ });
        }
    }

    pub async fn set_successor2(&self, succ2: NodeRef) {
        let old = self.successor2.write().await.replace(succ2.clone());
        if old.as_ref() != Some(&succ2) {
            self.emit(NodeEvent::Successor2Changed { new: succ2 });
        }
    }

    pub async fn read_policy(&self) -> ReadPolicy {
        *self.read_policy.read().await
    }

    pub async fn set_read_policy(&self, policy: ReadPolicy) {
        info!("Routing {:.0}% of reads to the backup", policy.backup_ratio() * 100.0);
        *self.read_policy.write().await = policy;
    }

    /// Called by a node that believes it is our predecessor.
    ///
    /// The candidate is accepted if we have no predecessor or it lies strictly
    /// between the current predecessor and us. Succeeds only if the candidate
    /// is our predecessor afterwards.
    pub async fn notify(&self, candidate: NodeRef) -> Result<(), ChordError> {
        if candidate == self.local {
            return Ok(());
        }

        let (accepted, old) = {
            let mut pred = self.predecessor.write().await;
            let accept = match pred.as_ref() {
                None => true,
                Some(p) => between(&p.id, &candidate.id, &self.local.id, false, false),
            };
            let old = pred.clone();
            if accept {
                *pred = Some(candidate.clone());
            }
            (accept, old)
        };

        if accepted && old.as_ref() != Some(&candidate) {
            self.emit(NodeEvent::PredecessorChanged {
                old: old.clone(),
                new: candidate.clone(),
            });
            self.adopt_predecessor(old, &candidate).await;
        }

        match self.predecessor.read().await.as_ref() {
            Some(p) if *p == candidate => Ok(()),
            _ => Err(ChordError::NotPredecessor),
        }
    }

    /// Hands the arc `(old, new]` over to a freshly accepted predecessor and
    /// rebuilds our backup from its data.
    async fn adopt_predecessor(&self, old: Option<NodeRef>, new: &NodeRef) {
        let lower = old.map_or_else(|| self.local.id.clone(), |p| p.id);
        if let Err(e) = self.transfer_range(&lower, &new.id, new).await {
            warn!("Handing keys to new predecessor {} failed: {}", new, e);
        }

        self.storage.clear_backup().await;
        if let Err(e) = self.transport.request_all_data(new).await {
            warn!("Requesting backup data from {} failed: {}", new, e);
        }
    }

    // Lookup

    /// Scans the finger table, then the successor, for the closest node
    /// strictly preceding `id`. Falls back to the local node.
    ///
    /// The successor is always set, so a live node always has a candidate;
    /// `NoCandidate` only reaches callers whose peer answered without one.
    pub async fn closest_preceding_finger(&self, id: &NodeId) -> Result<NodeRef, ChordError> {
        if let Some(node) = self.finger_table.read().await.closest_preceding_node(id) {
            return Ok(node.clone());
        }

        let succ = self.get_successor().await;
        if succ != self.local && between(&self.local.id, &succ.id, id, false, false) {
            return Ok(succ);
        }
        Ok(self.local.clone())
    }

    /// Finds the node that owns `id`.
    ///
    /// The lookup walks the ring iteratively, asking each hop for its
    /// successor and its closest preceding finger. It gives up after the
    /// configured hop limit so a ring in the middle of repair cannot make it
    /// spin forever.
    pub async fn find_successor(&self, id: &NodeId) -> Result<NodeRef, ChordError> {
        let succ = self.get_successor().await;
        if between(&self.local.id, id, &succ.id, false, true) {
            return Ok(succ);
        }

        let mut current = self.closest_preceding_finger(id).await?;
        if current == self.local {
            return Ok(succ);
        }

        let limit = self.config.lookup_hop_limit();
        let mut fell_back = false;
        for hop in 0..limit {
            let current_succ = match self.successor_of(&current).await {
                Ok(s) => s,
                Err(e) if e.is_unreachable() && !fell_back && current != succ => {
                    debug!("Hop {} to {} unreachable, retrying from successor: {}", hop, current, e);
                    self.finger_table.write().await.remove_node(&current);
                    fell_back = true;
                    current = succ.clone();
                    continue;
                }
                Err(e) => return Err(e),
            };

            if between(&current.id, id, &current_succ.id, false, true) {
                return Ok(current_succ);
            }

            let next = self.closest_preceding_finger_of(&current, id).await?;
            if next == current {
                return Ok(current_succ);
            }
            current = next;
        }

        Err(ChordError::HopLimitExceeded {
            id: id.to_string(),
            hops: limit,
        })
    }

    async fn successor_of(&self, node: &NodeRef) -> Result<NodeRef, ChordError> {
        if *node == self.local {
            return Ok(self.get_successor().await);
        }
        self.transport
            .get_successor(node)
            .await?
            .ok_or_else(|| ChordError::LookupFailed(format!("{} has no successor", node)))
    }

    async fn closest_preceding_finger_of(&self, node: &NodeRef, id: &NodeId) -> Result<NodeRef, ChordError> {
        if *node == self.local {
            return self.closest_preceding_finger(id).await;
        }
        self.transport.closest_preceding_finger(node, id).await
    }

    // Finger table

    pub async fn finger(&self, index: usize) -> Option<NodeRef> {
        self.finger_table.read().await.entry_for(index).cloned()
    }

    pub fn finger_count(&self) -> usize {
        self.width() * 8
    }

    /// Recomputes finger `index` through a lookup. On failure the stale entry
    /// stays in place.
    pub async fn fix_entry(&self, index: usize) -> Result<NodeRef, ChordError> {
        let start = self
            .finger_table
            .read()
            .await
            .start(index)
            .cloned()
            .ok_or_else(|| ChordError::LookupFailed(format!("no finger {}", index)))?;

        let node = self.find_successor(&start).await?;
        if self.finger_table.write().await.update_finger(index, node.clone()) {
            self.emit(NodeEvent::FingerUpdated {
                index,
                node: node.clone(),
            });
        }
        Ok(node)
    }

    /// Refreshes the next finger in round-robin order.
    pub async fn fix_next_finger(&self) -> Result<NodeRef, ChordError> {
        let count = self.finger_count();
        let index = self.next_finger.fetch_add(1, Ordering::Relaxed) % count;
        self.fix_entry(index).await
    }

    // Maintenance

    /// One successor-repair round: adopt a closer successor if one appeared,
    /// notify it about us, and refresh the fallback successor.
    pub async fn stabilize(&self) -> Result<(), ChordError> {
        let succ = self.get_successor().await;

        let succ_pred = if succ == self.local {
            self.get_predecessor().await
        } else {
            match self.transport.get_predecessor(&succ).await {
                Ok(p) => p,
                Err(e) if e.is_unreachable() => return self.handle_successor_failure(succ, e).await,
                Err(e) => return Err(e),
            }
        };

        let mut new_succ = succ.clone();
        if let Some(x) = succ_pred {
            if x != self.local && between(&self.local.id, &x.id, &succ.id, false, false) {
                new_succ = x;
            }
        }

        if new_succ != succ {
            self.set_successor(new_succ.clone()).await;
        }

        if new_succ != self.local {
            match self.transport.notify(&new_succ, &self.local).await {
                Ok(()) => {}
                Err(ChordError::NotPredecessor) => {
                    debug!("{} did not accept us as predecessor", new_succ);
                }
                Err(e) => warn!("Failed to notify successor {}: {}", new_succ, e),
            }
            self.refresh_successor2(&new_succ).await;
        }

        if new_succ != succ {
            self.request_all_data().await;
        }
        Ok(())
    }

    /// Promotes the fallback successor after `failed` stopped answering.
    async fn handle_successor_failure(&self, failed: NodeRef, cause: ChordError) -> Result<(), ChordError> {
        warn!("Successor {} unreachable: {}", failed, cause);
        self.finger_table.write().await.remove_node(&failed);

        let promoted = match self.get_successor2().await {
            Some(s2) if s2 != failed => s2,
            _ => self.nearest_finger().await.unwrap_or_else(|| self.local.clone()),
        };

        self.set_successor(promoted.clone()).await;
        self.emit(NodeEvent::SuccessorFailed {
            failed,
            promoted: promoted.clone(),
        });

        if promoted == self.local {
            *self.successor2.write().await = None;
        } else {
            if let Err(e) = self.transport.notify(&promoted, &self.local).await {
                debug!("Notify after promotion to {} failed: {}", promoted, e);
            }
            self.refresh_successor2(&promoted).await;
        }

        self.request_all_data().await;
        Ok(())
    }

    /// First live-looking finger clockwise from the local node.
    async fn nearest_finger(&self) -> Option<NodeRef> {
        let table = self.finger_table.read().await;
        let mut best: Option<&NodeRef> = None;
        for (_, entry) in table.entries() {
            let Some(node) = entry.node.as_ref() else { continue };
            if *node == self.local {
                continue;
            }
            best = match best {
                Some(b) if !between(&self.local.id, &node.id, &b.id, false, false) => Some(b),
                _ => Some(node),
            };
        }
        best.cloned()
    }

    async fn refresh_successor2(&self, succ: &NodeRef) {
        match self.transport.get_successor(succ).await {
            Ok(Some(s2)) => self.set_successor2(s2).await,
            Ok(None) => debug!("{} reported no successor", succ),
            Err(e) => debug!("Could not refresh successor2 from {}: {}", succ, e),
        }
    }

    /// Probes the predecessor and clears it if it stopped answering. The
    /// backup mapping then becomes ours: the dead node's arc now belongs to us.
    pub async fn check_predecessor(&self) -> Result<(), ChordError> {
        let pred = match self.get_predecessor().await {
            Some(p) if p != self.local => p,
            _ => return Ok(()),
        };

        match self.transport.get_successor(&pred).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_unreachable() => {
                {
                    let mut guard = self.predecessor.write().await;
                    if guard.as_ref() != Some(&pred) {
                        return Ok(());
                    }
                    *guard = None;
                }
                warn!("Predecessor {} unreachable: {}", pred, e);
                self.finger_table.write().await.remove_node(&pred);
                self.emit(NodeEvent::PredecessorCleared { failed: pred });

                let promoted = self.storage.promote_backup().await;
                if !promoted.is_empty() {
                    self.emit(NodeEvent::BackupPromoted { count: promoted.len() });
                    let succ = self.get_successor().await;
                    for (k, v) in promoted {
                        self.replicate(&succ, &k, &v).await;
                    }
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // Key-value operations

    /// Whether `id` falls into our arc `(predecessor, self]` per ring state.
    pub async fn owns(&self, id: &NodeId) -> bool {
        match self.predecessor.read().await.as_ref() {
            None => true,
            Some(pred) => between(&pred.id, id, &self.local.id, false, true),
        }
    }

    pub async fn put_key_val(&self, key: Key, value: Value) -> Result<(), ChordError> {
        let key_id = NodeId::from_key(&key, self.width());
        if !self.owns(&key_id).await {
            let owner = self.find_successor(&key_id).await?;
            if owner != self.local {
                debug!("Forwarding put of {} to {}", key, owner);
                return self.transport.put_key_val(&owner, &key, &value).await;
            }
        }

        // Writers hold the policy lock so no read is routed to a backup that
        // has not seen this write yet.
        let _policy = self.read_policy.write().await;
        self.storage.put(key.clone(), value.clone()).await;
        let succ = self.get_successor().await;
        self.replicate(&succ, &key, &value).await;
        Ok(())
    }

    pub async fn get_key(&self, key: &Key) -> Result<Value, ChordError> {
        let key_id = NodeId::from_key(key, self.width());
        if !self.owns(&key_id).await {
            let owner = self.find_successor(&key_id).await?;
            if owner != self.local {
                debug!("Forwarding get of {} to {}", key, owner);
                return self.transport.get_key(&owner, key).await;
            }
        }

        let policy = self.read_policy.read().await;
        if policy.route_to_backup() {
            let succ = self.get_successor().await;
            debug!("Routing get of {} to backup on {}", key, succ);
            match self.backup_read(&succ, key).await {
                Err(e) if e.is_unreachable() => {
                    warn!("Backup {} unreachable, reading primary: {}", succ, e);
                }
                other => return other,
            }
        }

        Ok(self.storage.get(key).await?)
    }

    async fn backup_read(&self, node: &NodeRef, key: &Key) -> Result<Value, ChordError> {
        if *node == self.local {
            return Ok(self.storage.get_backup(key).await?);
        }
        self.transport.get_backup_key(node, key).await
    }

    pub async fn get_backup_key(&self, key: &Key) -> Result<Value, ChordError> {
        Ok(self.storage.get_backup(key).await?)
    }

    pub async fn put_key_val_backup(&self, key: Key, value: Value) -> Result<(), ChordError> {
        debug!("Backing up {}", key);
        self.storage.put_backup(key, value).await;
        Ok(())
    }

    pub async fn remove_key_val_backup(&self, key: &Key, _value: &Value) -> Result<(), ChordError> {
        if self.storage.remove_backup(key).await.is_none() {
            debug!("Backup of {} was already gone", key);
        }
        Ok(())
    }

    /// Mirrors one pair into `target`'s backup mapping. Failures are
    /// reported through the event hook and otherwise ignored.
    async fn replicate(&self, target: &NodeRef, key: &Key, value: &Value) {
        let result = if *target == self.local {
            self.put_key_val_backup(key.clone(), value.clone()).await
        } else {
            self.transport.put_key_val_backup(target, key, value).await
        };

        if let Err(e) = result {
            self.emit(NodeEvent::ReplicationFailed {
                key: key.clone(),
                target: target.clone(),
                error: e.to_string(),
            });
        }
    }

    /// Moves every key in `(predecessor, from_id]` to `to`.
    pub async fn transfer_keys(&self, from_id: &NodeId, to: &NodeRef) -> Result<(), ChordError> {
        let lower = self
            .get_predecessor()
            .await
            .map_or_else(|| self.local.id.clone(), |p| p.id);
        self.transfer_range(&lower, from_id, to).await.map(|_| ())
    }

    async fn transfer_range(&self, lower: &NodeId, upper: &NodeId, dest: &NodeRef) -> Result<usize, ChordError> {
        if *dest == self.local {
            return Ok(0);
        }

        let pairs = self.storage.range(lower, upper, self.width()).await;
        if pairs.is_empty() {
            return Ok(0);
        }

        // A pair leaves the primary only once `dest` has it, so a cancelled
        // transfer can duplicate keys but never drop them.
        let mut moved = Vec::with_capacity(pairs.len());
        let mut last_error = None;
        for (k, v) in pairs {
            match self.transport.put_key_val(dest, &k, &v).await {
                Ok(()) => {
                    self.storage.remove_if_unchanged(&k, &v).await;
                    moved.push((k, v));
                }
                Err(e) => last_error = Some(e),
            }
        }

        // Our successor no longer needs backups of keys we gave away.
        let succ = self.get_successor().await;
        if succ != self.local {
            for (k, v) in &moved {
                if let Err(e) = self.transport.remove_key_val_backup(&succ, k, v).await {
                    debug!("Removing backup of {} from {} failed: {}", k, succ, e);
                }
            }
        }

        if !moved.is_empty() {
            info!("Transferred {} keys to {}", moved.len(), dest);
            self.emit(NodeEvent::KeysTransferred {
                count: moved.len(),
                to: dest.clone(),
            });
        }

        match last_error {
            Some(e) => Err(ChordError::TransferFailed(e.to_string())),
            None => Ok(moved.len()),
        }
    }

    /// Pushes every primary pair into our successor's backup mapping.
    pub async fn request_all_data(&self) {
        let succ = self.get_successor().await;
        let pairs = self.storage.snapshot().await;
        debug!("Pushing {} keys to backup on {}", pairs.len(), succ);
        for (k, v) in pairs {
            self.replicate(&succ, &k, &v).await;
        }
    }

    // Join

    /// Joins the ring that `parent_addr` belongs to, asking the parent for
    /// its identifier first.
    pub async fn join(&self, parent_addr: &str) -> Result<(), ChordError> {
        let parent_id = self
            .transport
            .get_id(parent_addr)
            .await
            .map_err(|e| ChordError::JoinFailed(format!("getting parent id: {}", e)))?;
        let parent = NodeRef::new(parent_id, parent_addr);
        info!("Attaching {} to {}", self.local, parent);
        self.join_via(&parent).await
    }

    pub async fn join_via(&self, parent: &NodeRef) -> Result<(), ChordError> {
        if *parent == self.local {
            return Err(ChordError::JoinFailed(format!(
                "identifier {} collides with parent",
                self.local.id
            )));
        }

        let succ = self
            .transport
            .find_successor(parent, &self.local.id)
            .await
            .map_err(|e| ChordError::JoinFailed(e.to_string()))?;
        if succ == self.local {
            return Err(ChordError::JoinFailed(format!(
                "identifier {} already present in the ring",
                self.local.id
            )));
        }

        *self.predecessor.write().await = None;
        self.set_successor(succ.clone()).await;
        self.refresh_successor2(&succ).await;
        Ok(())
    }

    pub async fn snapshot(&self) -> NodeSnapshot {
        let fingers = self
            .finger_table
            .read()
            .await
            .entries()
            .filter_map(|(i, e)| e.node.clone().map(|n| (i, n)))
            .collect();

        NodeSnapshot {
            local: self.local.clone(),
            predecessor: self.get_predecessor().await,
            successor: self.get_successor().await,
            successor2: self.get_successor2().await,
            fingers,
            primary: self.storage.snapshot().await,
            backup: self.storage.backup_snapshot().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::network::memory::MemoryNetwork;
    use crate::network::Transport;
    use std::sync::Mutex;
    use std::time::Duration;

    fn config(id: u64) -> NodeConfig {
        NodeConfig::new(format!("node-{}", id))
            .with_id_bytes(1)
            .with_id(format!("{:02x}", id))
            .with_backup_read_ratio(0.0)
            .with_rpc_timeout(Duration::from_millis(500))
    }

    fn node_ref(id: u64) -> NodeRef {
        NodeRef::new(NodeId::from_u64(id, 1), format!("node-{}", id))
    }

    fn spawn(network: &Arc<MemoryNetwork>, id: u64) -> Arc<ChordNode> {
        let node = Arc::new(ChordNode::new(config(id), network.clone()).unwrap());
        network.register(&node);
        node
    }

    /// Wires a consistent ring by hand, successor pointers only.
    async fn ring(network: &Arc<MemoryNetwork>, ids: &[u64]) -> Vec<Arc<ChordNode>> {
        let nodes: Vec<_> = ids.iter().map(|&id| spawn(network, id)).collect();
        for (i, node) in nodes.iter().enumerate() {
            let succ = &nodes[(i + 1) % nodes.len()];
            let succ2 = &nodes[(i + 2) % nodes.len()];
            let pred = &nodes[(i + nodes.len() - 1) % nodes.len()];
            node.set_successor(succ.local().clone()).await;
            node.set_successor2(succ2.local().clone()).await;
            node.set_predecessor(pred.local().clone()).await;
        }
        nodes
    }

    #[tokio::test]
    async fn singleton_owns_everything() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let node = spawn(&network, 42);

        assert_eq!(node.get_successor().await, *node.local());
        assert_eq!(node.get_predecessor().await, None);
        let target = NodeId::from_u64(7, 1);
        assert_eq!(node.find_successor(&target).await.unwrap(), *node.local());
        assert_eq!(node.closest_preceding_finger(&target).await.unwrap(), *node.local());
    }

    #[tokio::test]
    async fn lookups_route_around_the_ring() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let nodes = ring(&network, &[0, 85, 170]).await;

        for node in &nodes {
            let owner = node.find_successor(&NodeId::from_u64(100, 1)).await.unwrap();
            assert_eq!(owner, node_ref(170));
            let owner = node.find_successor(&NodeId::from_u64(200, 1)).await.unwrap();
            assert_eq!(owner, node_ref(0));
            let owner = node.find_successor(&NodeId::from_u64(85, 1)).await.unwrap();
            assert_eq!(owner, node_ref(85));
        }
    }

    #[tokio::test]
    async fn lookup_gives_up_after_hop_limit() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let short = Arc::new(ChordNode::new(config(0).with_max_lookup_hops(2), network.clone()).unwrap());
        network.register(&short);
        let rest: Vec<_> = [20, 40, 60, 80].iter().map(|&id| spawn(&network, id)).collect();

        // a bare chain without fingers: 0 -> 20 -> 40 -> 60 -> 80 -> 0
        short.set_successor(rest[0].local().clone()).await;
        for pair in rest.windows(2) {
            pair[0].set_successor(pair[1].local().clone()).await;
        }
        rest[3].set_successor(short.local().clone()).await;

        let target = NodeId::from_u64(90, 1);
        let result = short.find_successor(&target).await;
        assert!(matches!(result, Err(ChordError::HopLimitExceeded { hops: 2, .. })));

        // the same walk succeeds with the default budget
        assert_eq!(rest[0].find_successor(&target).await.unwrap(), node_ref(0));
    }

    #[tokio::test]
    async fn fixing_fingers_converges() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let nodes = ring(&network, &[0, 85, 170]).await;
        let node = &nodes[0];

        for i in 0..node.finger_count() {
            node.fix_entry(i).await.unwrap();
        }
        let first: Vec<_> = futures::future::join_all((0..8).map(|i| node.finger(i))).await;

        for _ in 0..3 {
            for i in 0..node.finger_count() {
                node.fix_next_finger().await.unwrap();
                assert_eq!(node.finger(i).await, first[i]);
            }
        }

        // starts 1..64 belong to 85, 128 to 170
        assert_eq!(first[0], Some(node_ref(85)));
        assert_eq!(first[6], Some(node_ref(85)));
        assert_eq!(first[7], Some(node_ref(170)));
    }

    #[tokio::test]
    async fn notify_follows_acceptance_rule() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let node = spawn(&network, 100);
        spawn(&network, 50);
        spawn(&network, 80);
        spawn(&network, 150);

        node.notify(node_ref(50)).await.unwrap();
        assert_eq!(node.get_predecessor().await, Some(node_ref(50)));

        // 80 lies in (50, 100)
        node.notify(node_ref(80)).await.unwrap();
        assert_eq!(node.get_predecessor().await, Some(node_ref(80)));

        // 50 and 150 do not lie in (80, 100)
        assert_eq!(node.notify(node_ref(50)).await, Err(ChordError::NotPredecessor));
        assert_eq!(node.notify(node_ref(150)).await, Err(ChordError::NotPredecessor));
        assert_eq!(node.get_predecessor().await, Some(node_ref(80)));

        // the current predecessor re-notifying is fine
        node.notify(node_ref(80)).await.unwrap();
    }

    #[tokio::test]
    async fn put_then_get_reads_primary_and_backup() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let nodes = ring(&network, &[0, 85, 170]).await;

        for i in 0..20 {
            let key = Key(format!("k{}", i).into_bytes());
            nodes[i % 3].put_key_val(key, Value::from("v")).await.unwrap();
        }

        for node in &nodes {
            node.set_read_policy(ReadPolicy::primary_only()).await;
        }
        for i in 0..20 {
            let key = Key(format!("k{}", i).into_bytes());
            assert_eq!(nodes[(i + 1) % 3].get_key(&key).await.unwrap(), Value::from("v"));
        }

        for node in &nodes {
            node.set_read_policy(ReadPolicy::backup_only()).await;
        }
        for i in 0..20 {
            let key = Key(format!("k{}", i).into_bytes());
            assert_eq!(nodes[(i + 2) % 3].get_key(&key).await.unwrap(), Value::from("v"));
        }

        let missing = nodes[0].get_key(&Key::from("missing")).await;
        assert_eq!(missing, Err(ChordError::Storage(StorageError::KeyNotFound)));
    }

    #[tokio::test]
    async fn keys_land_on_their_owner() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let nodes = ring(&network, &[0, 85, 170]).await;

        for i in 0..30 {
            let key = Key(format!("key-{}", i).into_bytes());
            nodes[0].put_key_val(key, Value::from("x")).await.unwrap();
        }

        for (i, node) in nodes.iter().enumerate() {
            let pred = &nodes[(i + 2) % 3];
            for (k, _) in node.storage().snapshot().await {
                let id = NodeId::from_key(&k, 1);
                assert!(between(pred.id(), &id, node.id(), false, true));
            }
            // the successor backs up exactly our primary
            let succ = &nodes[(i + 1) % 3];
            let mut primary: Vec<_> = node.storage().snapshot().await.into_iter().map(|(k, _)| k.0).collect();
            let mut backup: Vec<_> = succ.storage().backup_snapshot().await.into_iter().map(|(k, _)| k.0).collect();
            primary.sort();
            backup.sort();
            assert_eq!(primary, backup);
        }
    }

    #[tokio::test]
    async fn transfer_keys_moves_exactly_the_arc() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let owner = spawn(&network, 200);
        let dest = spawn(&network, 60);
        owner.set_predecessor(node_ref(10)).await;

        let keys: Vec<Key> = (0..60).map(|i| Key(format!("t{}", i).into_bytes())).collect();
        for k in &keys {
            owner.storage().put(k.clone(), Value::from("v")).await;
        }

        let from = NodeId::from_u64(60, 1);
        owner.transfer_keys(&from, dest.local()).await.unwrap();

        let pred = NodeId::from_u64(10, 1);
        for k in &keys {
            let id = NodeId::from_key(k, 1);
            let expected_moved = between(&pred, &id, &from, false, true);
            assert_eq!(owner.storage().get(k).await.is_err(), expected_moved);
            assert_eq!(dest.storage().get(k).await.is_ok(), expected_moved);
        }
    }

    #[test]
    fn read_policy_splits_reads_by_ratio() {
        let draws = 20_000;
        let policy = ReadPolicy::new(0.5).unwrap();
        let to_backup = (0..draws).filter(|_| policy.route_to_backup()).count();
        let share = to_backup as f64 / draws as f64;
        assert!((0.45..=0.55).contains(&share), "share {}", share);

        let policy = ReadPolicy::new(0.2).unwrap();
        let to_backup = (0..draws).filter(|_| policy.route_to_backup()).count();
        let share = to_backup as f64 / draws as f64;
        assert!((0.15..=0.25).contains(&share), "share {}", share);

        assert!((0..1000).all(|_| !ReadPolicy::primary_only().route_to_backup()));
        assert!((0..1000).all(|_| ReadPolicy::backup_only().route_to_backup()));
        assert!(ReadPolicy::new(1.5).is_err());
    }

    async fn held_anywhere(nodes: &[&Arc<ChordNode>], keys: &[Key]) -> usize {
        let mut held = 0;
        for k in keys {
            for node in nodes {
                if node.storage().get(k).await.is_ok() {
                    held += 1;
                    break;
                }
            }
        }
        held
    }

    #[tokio::test]
    async fn cancelled_handoff_keeps_every_key() {
        // calls time out long before 20k keys can be handed over
        let network = MemoryNetwork::new(Duration::from_millis(1));
        let owner = spawn(&network, 200);
        let joiner = spawn(&network, 150);
        owner.set_predecessor(node_ref(100)).await;

        let keys: Vec<Key> = (0..20_000).map(|i| Key(format!("h{}", i).into_bytes())).collect();
        for k in &keys {
            owner.storage().put(k.clone(), Value::from("v")).await;
        }

        let _ = network.notify(owner.local(), joiner.local()).await;
        assert_eq!(held_anywhere(&[&owner, &joiner], &keys).await, keys.len());

        // same for an explicit transfer cut short by the caller
        let _ = network
            .transfer_keys(owner.local(), &NodeId::from_u64(255, 1), joiner.local())
            .await;
        assert_eq!(held_anywhere(&[&owner, &joiner], &keys).await, keys.len());
    }

    #[tokio::test]
    async fn successor_failure_promotes_successor2_without_losing_data() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let nodes = ring(&network, &[0, 85, 170]).await;
        let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

        let keys: Vec<Key> = (0..30).map(|i| Key(format!("f{}", i).into_bytes())).collect();
        for k in &keys {
            a.put_key_val(k.clone(), Value::from("v")).await.unwrap();
        }
        assert!(b.storage().len().await > 0);

        network.kill(b.local());

        a.stabilize().await.unwrap();
        assert_eq!(a.get_successor().await, *c.local());

        c.check_predecessor().await.unwrap();
        assert_eq!(c.get_predecessor().await, None);
        a.stabilize().await.unwrap();
        assert_eq!(c.get_predecessor().await, Some(a.local().clone()));

        for k in &keys {
            assert_eq!(a.get_key(k).await.unwrap(), Value::from("v"));
        }
    }

    #[tokio::test]
    async fn events_reach_the_hook() {
        let network = MemoryNetwork::new(Duration::from_millis(500));
        let seen: Arc<Mutex<Vec<NodeEvent>>> = Arc::default();
        let sink = seen.clone();
        let node = ChordNode::new(config(10), network.clone())
            .unwrap()
            .with_event_hook(Arc::new(move |_: &NodeRef, e: &NodeEvent| {
                sink.lock().unwrap().push(e.clone())
            }));
        let node = Arc::new(node);
        network.register(&node);

        node.set_successor(node_ref(20)).await;
        node.set_successor(node_ref(20)).await;

        let events = seen.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![NodeEvent::SuccessorChanged {
                old: node_ref(10),
                new: node_ref(20)
            }]
        );
    }
}
