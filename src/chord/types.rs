use crate::error::ChordError;
use sha2::{Digest, Sha256};
use std::fmt;

/// NodeId represents a position in the Chord ring, for a node or for a key.
///
/// Identifiers are big-endian byte strings of a fixed, per-ring width, so the
/// ring holds `2^(8 * len)` positions. All identifiers compared against each
/// other must have the same width.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Vec<u8>);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.len().min(8);
        write!(f, "NodeId({})", hex::encode(&self.0[..shown]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl NodeId {
    /// Hashes arbitrary input (a key or a node address) into an identifier of
    /// `width` bytes.
    pub fn hash(input: &[u8], width: usize) -> Self {
        let digest = Sha256::digest(input);
        NodeId(digest[..width.min(digest.len())].to_vec())
    }

    /// Creates NodeId from key bytes to determine their responsible node
    pub fn from_key(key: &Key, width: usize) -> Self {
        Self::hash(&key.0, width)
    }

    /// Parses a hex encoded identifier that must be exactly `width` bytes wide.
    pub fn from_hex(s: &str, width: usize) -> Result<Self, ChordError> {
        let bytes = hex::decode(s)
            .map_err(|e| ChordError::InvalidNodeId(format!("{}: {}", s, e)))?;
        Self::from_slice(&bytes, width)
    }

    /// Builds an identifier from raw bytes received off the wire.
    pub fn from_slice(bytes: &[u8], width: usize) -> Result<Self, ChordError> {
        if bytes.len() != width {
            return Err(ChordError::InvalidNodeId(format!(
                "expected {} bytes, got {}",
                width,
                bytes.len()
            )));
        }
        Ok(NodeId(bytes.to_vec()))
    }

    /// Identifier with the numeric value `value`, left-padded to `width` bytes.
    pub fn from_u64(value: u64, width: usize) -> Self {
        let be = value.to_be_bytes();
        let mut id = vec![0u8; width];
        let n = width.min(be.len());
        id[width - n..].copy_from_slice(&be[be.len() - n..]);
        NodeId(id)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone()
    }

    /// Width of the identifier space in bits.
    pub fn bits(&self) -> usize {
        self.0.len() * 8
    }

    /// Returns `(self + 2^k) mod 2^bits`, the start of the kth finger interval.
    /// k is 0-based here.
    pub fn add_power_of_two(&self, k: usize) -> NodeId {
        let mut result = self.0.clone();
        if k >= self.bits() {
            return NodeId(result);
        }

        let mut index = result.len() - 1 - k / 8;
        let mut carry = 1u16 << (k % 8);
        loop {
            let sum = result[index] as u16 + carry;
            result[index] = (sum & 0xff) as u8;
            carry = sum >> 8;
            if carry == 0 || index == 0 {
                break;
            }
            index -= 1;
        }
        NodeId(result)
    }
}

/// Modular arc test over the identifier ring: is `x` on the clockwise arc
/// from `start` to `end`?
pub fn between(start: &NodeId, x: &NodeId, end: &NodeId, incl_start: bool, incl_end: bool) -> bool {
    if (incl_start && x == start) || (incl_end && x == end) {
        return true;
    }

    if start < end {
        start < x && x < end
    } else if start > end {
        // the arc wraps through zero
        x > start || x < end
    } else {
        x != start
    }
}

/// A node in the ring: its identifier and the address it serves RPCs on.
///
/// Two references are the same node iff their identifiers match.
#[derive(Clone, Debug, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub addr: String,
}

impl NodeRef {
    pub fn new(id: NodeId, addr: impl Into<String>) -> Self {
        Self { id, addr: addr.into() }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::hash::Hash for NodeRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Key type for storing data in the DHT
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key(pub Vec<u8>);

/// Value type for storing data in the DHT
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Value(pub Vec<u8>);

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
