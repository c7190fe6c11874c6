use crate::chord::node::ChordNode;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Spawns the three maintenance workers of `node`. They run until `shutdown`
/// flips to `true` or its sender is dropped.
pub fn spawn_all(node: &Arc<ChordNode>, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_stabilize_worker(node.clone(), shutdown.clone())),
        tokio::spawn(run_finger_maintainer(node.clone(), shutdown.clone())),
        tokio::spawn(run_predecessor_checker(node.clone(), shutdown.clone())),
    ]
}

pub async fn run_stabilize_worker(node: Arc<ChordNode>, mut shutdown: watch::Receiver<bool>) {
    info!("Starting stabilize worker");
    let period = node.config().stabilize_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("Running stabilize");
                if let Err(e) = node.stabilize().await {
                    error!("Stabilize failed: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Stabilize worker stopped");
}

/// Refreshes one finger per tick, cycling through the table.
pub async fn run_finger_maintainer(node: Arc<ChordNode>, mut shutdown: watch::Receiver<bool>) {
    info!("Starting finger maintainer");
    let period = node.config().fix_fingers_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = node.fix_next_finger().await {
                    // Expected while the ring is still settling.
                    warn!("Failed to fix finger: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Finger maintainer stopped");
}

pub async fn run_predecessor_checker(node: Arc<ChordNode>, mut shutdown: watch::Receiver<bool>) {
    info!("Starting predecessor health checker");
    let period = node.config().check_predecessor_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("Checking predecessor");
                if let Err(e) = node.check_predecessor().await {
                    error!("Predecessor check failed: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("Predecessor health checker stopped");
}
