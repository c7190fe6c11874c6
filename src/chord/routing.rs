use crate::chord::types::{between, NodeId, NodeRef};

/// One cached finger: the node believed to own `start`.
#[derive(Debug, Clone)]
pub struct FingerEntry {
    pub start: NodeId,
    pub node: Option<NodeRef>,
}

/// Routing table of M entries, entry i caching the owner of `local + 2^i`.
///
/// Entries are best-effort: a stale entry only costs extra hops because the
/// final hop of every lookup is checked against the remote successor.
#[derive(Debug, Clone)]
pub struct FingerTable {
    local: NodeId,
    entries: Vec<FingerEntry>,
}

impl FingerTable {
    pub fn new(local: NodeId) -> Self {
        let entries = (0..local.bits())
            .map(|i| FingerEntry {
                start: local.add_power_of_two(i),
                node: None,
            })
            .collect();
        Self { local, entries }
    }

    /// Identifier that entry `index` is responsible for tracking.
    pub fn start(&self, index: usize) -> Option<&NodeId> {
        self.entries.get(index).map(|e| &e.start)
    }

    /// The cached entry, possibly stale.
    pub fn entry_for(&self, index: usize) -> Option<&NodeRef> {
        self.entries.get(index).and_then(|e| e.node.as_ref())
    }

    /// Overwrites entry `index`. Returns true if the cached node changed.
    pub fn update_finger(&mut self, index: usize, node: NodeRef) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                let changed = entry.node.as_ref() != Some(&node);
                entry.node = Some(node);
                changed
            }
            None => false,
        }
    }

    /// Drops every entry pointing at `node`, typically after it was found dead.
    pub fn remove_node(&mut self, node: &NodeRef) -> usize {
        let mut removed = 0;
        for entry in self.entries.iter_mut() {
            if entry.node.as_ref() == Some(node) {
                entry.node = None;
                removed += 1;
            }
        }
        removed
    }

    /// Scans from the highest finger down for the first node strictly between
    /// the local node and `target`.
    pub fn closest_preceding_node(&self, target: &NodeId) -> Option<&NodeRef> {
        self.entries
            .iter()
            .rev()
            .filter_map(|e| e.node.as_ref())
            .find(|node| between(&self.local, &node.id, target, false, false))
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &FingerEntry)> {
        self.entries.iter().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(v: u64) -> NodeRef {
        NodeRef::new(NodeId::from_u64(v, 1), format!("node-{}", v))
    }

    #[test]
    fn starts_follow_powers_of_two() {
        let table = FingerTable::new(NodeId::from_u64(200, 1));
        assert_eq!(table.entries().count(), 8);
        assert_eq!(table.start(0), Some(&NodeId::from_u64(201, 1)));
        assert_eq!(table.start(3), Some(&NodeId::from_u64(208, 1)));
        assert_eq!(table.start(7), Some(&NodeId::from_u64(72, 1)));
        assert_eq!(table.start(8), None);
    }

    #[test]
    fn closest_preceding_prefers_highest_qualifying_finger() {
        let mut table = FingerTable::new(NodeId::from_u64(0, 1));
        table.update_finger(0, node(10));
        table.update_finger(5, node(40));
        table.update_finger(7, node(170));

        let target = NodeId::from_u64(100, 1);
        assert_eq!(table.closest_preceding_node(&target), Some(&node(40)));

        let target = NodeId::from_u64(200, 1);
        assert_eq!(table.closest_preceding_node(&target), Some(&node(170)));

        // nothing lies strictly between 0 and 5
        let target = NodeId::from_u64(5, 1);
        assert_eq!(table.closest_preceding_node(&target), None);
    }

    #[test]
    fn closest_preceding_wraps_through_zero() {
        let mut table = FingerTable::new(NodeId::from_u64(200, 1));
        table.update_finger(4, node(220));
        table.update_finger(6, node(10));

        let target = NodeId::from_u64(50, 1);
        assert_eq!(table.closest_preceding_node(&target), Some(&node(10)));
        let target = NodeId::from_u64(5, 1);
        assert_eq!(table.closest_preceding_node(&target), Some(&node(220)));
    }

    #[test]
    fn update_reports_changes_and_remove_clears() {
        let mut table = FingerTable::new(NodeId::from_u64(0, 1));
        assert!(table.entries().all(|(_, e)| e.node.is_none()));
        assert!(table.update_finger(1, node(5)));
        assert!(!table.update_finger(1, node(5)));
        assert!(table.update_finger(2, node(5)));
        assert_eq!(table.remove_node(&node(5)), 2);
        assert!(table.entry_for(1).is_none());
        assert!(!table.update_finger(99, node(5)));
    }
}
