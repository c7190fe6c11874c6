use crate::chord::node::ChordNode;
use crate::chord::workers;
use crate::error::{NetworkError, RingError};
use crate::network::grpc::client::GrpcTransport;
use crate::network::grpc::thread::GrpcThread;
use crate::network::grpc::PeerConfig;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

const SERVER_STARTUP_WAIT: Duration = Duration::from_secs(5);
const DEBUG_DUMP_INTERVAL: Duration = Duration::from_secs(5);

/// A ring node served over gRPC, together with its maintenance workers.
pub struct ChordPeer {
    node: Arc<ChordNode>,
    addr: SocketAddr,
    debug: bool,
    shutdown_tx: watch::Sender<bool>,
    server_shutdown: Option<oneshot::Sender<()>>,
    grpc_handle: Option<JoinHandle<Result<(), NetworkError>>>,
    workers: Vec<JoinHandle<()>>,
}

impl ChordPeer {
    /// Binds the listener and starts serving. The node id is derived from the
    /// bound address unless the config supplies one.
    pub async fn new(config: PeerConfig) -> Result<Self, RingError> {
        let bind_addr = format!("{}:{}", config.host, config.grpc_port.unwrap_or(0));
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            NetworkError::ConnectionFailed(format!("Failed to bind {}: {}", bind_addr, e))
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| NetworkError::Grpc(format!("Failed to read bound address: {}", e)))?;

        let node_config = config.node.with_addr(addr.to_string());
        let transport = Arc::new(GrpcTransport::new(
            node_config.rpc_timeout(),
            node_config.id_bytes,
        ));
        let node = Arc::new(ChordNode::new(node_config, transport)?);
        info!("Created node {}", node.local());

        let (shutdown_tx, _) = watch::channel(false);
        let mut peer = Self {
            node,
            addr,
            debug: config.debug,
            shutdown_tx,
            server_shutdown: None,
            grpc_handle: None,
            workers: Vec::new(),
        };
        peer.start_grpc_server(listener).await?;
        Ok(peer)
    }

    async fn start_grpc_server(&mut self, listener: TcpListener) -> Result<(), NetworkError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let grpc_thread = GrpcThread::new(self.node.clone(), listener, shutdown_rx, ready_tx);
        self.grpc_handle = Some(tokio::spawn(grpc_thread.run()));
        self.server_shutdown = Some(shutdown_tx);

        match tokio::time::timeout(SERVER_STARTUP_WAIT, ready_rx).await {
            Ok(Ok(_)) => {
                info!("gRPC server is ready and listening on {}", self.addr);
                Ok(())
            }
            Ok(Err(_)) => {
                error!("gRPC server failed to initialize properly");
                Err(NetworkError::Grpc("Server failed to initialize".into()))
            }
            Err(_) => {
                error!("gRPC server startup timed out");
                Err(NetworkError::Grpc("Server startup timed out".into()))
            }
        }
    }

    /// Starts a new ring with this node as its only member.
    pub fn create_network(&mut self) {
        info!("Creating new ring at {}", self.node.local());
        self.start_workers();
    }

    /// Joins the ring that `parent_addr` belongs to.
    pub async fn join(&mut self, parent_addr: &str) -> Result<(), RingError> {
        info!("Joining ring through {}", parent_addr);
        self.node.join(parent_addr).await?;
        info!(
            "Joined ring, successor is {}",
            self.node.get_successor().await
        );
        self.start_workers();
        Ok(())
    }

    fn start_workers(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.workers = workers::spawn_all(&self.node, &shutdown_rx);
    }

    /// Serves until Ctrl-C, then shuts down.
    pub async fn run(&mut self) -> Result<(), RingError> {
        let mut dump = tokio::time::interval(DEBUG_DUMP_INTERVAL);
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    info!("Shutdown requested");
                    break;
                }
                _ = dump.tick(), if self.debug => {
                    info!("{}", self.node.snapshot().await);
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Stops the workers and the server and waits for them to finish.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }

        if let Some(tx) = self.server_shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.grpc_handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("gRPC server error: {}", e),
                Err(e) => error!("gRPC server task failed: {}", e),
            }
        }
        info!("Node {} stopped", self.node.local());
    }

    pub fn node(&self) -> &Arc<ChordNode> {
        &self.node
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn get_port(&self) -> u16 {
        self.addr.port()
    }
}
