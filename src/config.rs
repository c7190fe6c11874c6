use crate::chord::types::NodeId;
use crate::chord::{
    CHECK_PREDECESSOR_INTERVAL_MS, DEFAULT_BACKUP_READ_RATIO, DEFAULT_ID_BYTES,
    FIX_FINGERS_INTERVAL_MS, RPC_TIMEOUT_MS, STABILIZE_INTERVAL_MS,
};
use crate::error::ChordError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings of a single ring node. Constructed explicitly and handed to the
/// node, or loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the node advertises to its peers.
    pub addr: String,
    /// Hex identifier to use instead of hashing `addr`.
    pub id: Option<String>,
    pub id_bytes: usize,
    pub stabilize_interval_ms: u64,
    pub fix_fingers_interval_ms: u64,
    pub check_predecessor_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    /// Defaults to the identifier width in bits.
    pub max_lookup_hops: Option<usize>,
    /// Share of `GetKey` requests answered from the successor's backup copy.
    pub backup_read_ratio: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:0".to_string(),
            id: None,
            id_bytes: DEFAULT_ID_BYTES,
            stabilize_interval_ms: STABILIZE_INTERVAL_MS,
            fix_fingers_interval_ms: FIX_FINGERS_INTERVAL_MS,
            check_predecessor_interval_ms: CHECK_PREDECESSOR_INTERVAL_MS,
            rpc_timeout_ms: RPC_TIMEOUT_MS,
            max_lookup_hops: None,
            backup_read_ratio: DEFAULT_BACKUP_READ_RATIO,
        }
    }
}

impl NodeConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ChordError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChordError::InvalidConfig(format!("reading {}: {}", path.display(), e))
        })?;
        let config: NodeConfig = serde_json::from_str(&raw).map_err(|e| {
            ChordError::InvalidConfig(format!("parsing {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_id_bytes(mut self, id_bytes: usize) -> Self {
        self.id_bytes = id_bytes;
        self
    }

    pub fn with_backup_read_ratio(mut self, ratio: f64) -> Self {
        self.backup_read_ratio = ratio;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_lookup_hops(mut self, hops: usize) -> Self {
        self.max_lookup_hops = Some(hops);
        self
    }

    pub fn with_intervals(mut self, stabilize: Duration, fix_fingers: Duration, check_predecessor: Duration) -> Self {
        self.stabilize_interval_ms = stabilize.as_millis() as u64;
        self.fix_fingers_interval_ms = fix_fingers.as_millis() as u64;
        self.check_predecessor_interval_ms = check_predecessor.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), ChordError> {
        if !(1..=32).contains(&self.id_bytes) {
            return Err(ChordError::InvalidConfig(format!(
                "id_bytes must be within 1..=32, got {}",
                self.id_bytes
            )));
        }
        if !(0.0..=1.0).contains(&self.backup_read_ratio) {
            return Err(ChordError::InvalidConfig(format!(
                "backup_read_ratio must be within [0, 1], got {}",
                self.backup_read_ratio
            )));
        }
        if self.max_lookup_hops == Some(0) {
            return Err(ChordError::InvalidConfig("max_lookup_hops must be positive".into()));
        }
        if let Some(id) = &self.id {
            NodeId::from_hex(id, self.id_bytes)?;
        }
        Ok(())
    }

    /// The node identifier: the supplied one, or the hash of the address.
    pub fn node_id(&self) -> Result<NodeId, ChordError> {
        match &self.id {
            Some(hex_id) => NodeId::from_hex(hex_id, self.id_bytes),
            None => Ok(NodeId::hash(self.addr.as_bytes(), self.id_bytes)),
        }
    }

    pub fn lookup_hop_limit(&self) -> usize {
        self.max_lookup_hops.unwrap_or(self.id_bytes * 8)
    }

    pub fn stabilize_interval(&self) -> Duration {
        Duration::from_millis(self.stabilize_interval_ms)
    }

    pub fn fix_fingers_interval(&self) -> Duration {
        Duration::from_millis(self.fix_fingers_interval_ms)
    }

    pub fn check_predecessor_interval(&self) -> Duration {
        Duration::from_millis(self.check_predecessor_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
