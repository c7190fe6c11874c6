use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Chord protocol error: {0}")]
    Chord(#[from] ChordError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failures of the transport itself. All of these are transient from the
/// ring's point of view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("gRPC error: {0}")]
    Grpc(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChordError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Node is not predecessor")]
    NotPredecessor,

    #[error("No closest preceding finger")]
    NoCandidate,

    #[error("Lookup for {id} gave up after {hops} hops")]
    HopLimitExceeded { id: String, hops: usize },

    #[error("Cannot find successor: {0}")]
    LookupFailed(String),

    #[error("Invalid node ID: {0}")]
    InvalidNodeId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to join ring: {0}")]
    JoinFailed(String),

    #[error("Key transfer failed: {0}")]
    TransferFailed(String),

    #[error("Remote node failed: {0}")]
    Remote(String),
}

impl ChordError {
    /// Whether the error means the remote side could not be reached at all,
    /// as opposed to the remote answering with a protocol error.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ChordError::Network(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Key not found")]
    KeyNotFound,
}
