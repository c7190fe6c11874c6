pub mod client;
pub mod server;
pub mod thread;

use crate::config::NodeConfig;

/// Process-level settings of a peer served over gRPC.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub host: String,
    pub grpc_port: Option<u16>, // Optional gRPC port (random if not specified)
    pub node: NodeConfig,
    /// Periodically log the node's ring state and datastore.
    pub debug: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            grpc_port: None,
            node: NodeConfig::default(),
            debug: false,
        }
    }
}
