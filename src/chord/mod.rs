pub mod events;
pub mod node;
pub mod routing;
pub mod storage;
pub mod types;
pub mod workers;

// Chord configuration defaults
pub const DEFAULT_ID_BYTES: usize = 20;
pub const STABILIZE_INTERVAL_MS: u64 = 2_000;
pub const FIX_FINGERS_INTERVAL_MS: u64 = 500;
pub const CHECK_PREDECESSOR_INTERVAL_MS: u64 = 3_000;
pub const RPC_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_BACKUP_READ_RATIO: f64 = 0.5;
