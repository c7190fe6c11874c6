use crate::chord::node::ChordNode;
use crate::error::NetworkError;
use crate::network::grpc::server::ChordGrpcServer;
use crate::network::messages::chord::chord_node_server::ChordNodeServer;
use futures::FutureExt;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

/// Owns the listener of one peer and serves it until shut down.
pub struct GrpcThread {
    node: Arc<ChordNode>,
    listener: TcpListener,
    shutdown_rx: oneshot::Receiver<()>,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl GrpcThread {
    pub fn new(
        node: Arc<ChordNode>,
        listener: TcpListener,
        shutdown_rx: oneshot::Receiver<()>,
        ready_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            node,
            listener,
            shutdown_rx,
            ready_tx: Some(ready_tx),
        }
    }

    pub async fn run(mut self) -> Result<(), NetworkError> {
        let addr = self
            .listener
            .local_addr()
            .map_err(|e| NetworkError::Grpc(format!("Failed to read listener address: {}", e)))?;

        info!("Starting gRPC server on {}", addr);

        let server = ChordGrpcServer::new(self.node.clone());
        let router = Server::builder()
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .add_service(ChordNodeServer::new(server));

        if let Some(ready_tx) = self.ready_tx.take() {
            let _ = ready_tx.send(());
        }

        let incoming = TcpListenerStream::new(self.listener);
        match router
            .serve_with_incoming_shutdown(incoming, self.shutdown_rx.map(|_| ()))
            .await
        {
            Ok(_) => {
                info!("gRPC server on {} shut down gracefully", addr);
                Ok(())
            }
            Err(e) => {
                error!("gRPC server encountered a fatal error: {:?}", e);
                Err(NetworkError::Grpc(format!("Server error: {}", e)))
            }
        }
    }
}
