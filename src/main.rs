use chordring::{
    config::NodeConfig,
    network::{grpc::PeerConfig, node::ChordPeer},
};
use clap::{Args, Parser, Subcommand};
use log::{error, info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "chordring")]
#[command(about = "A Chord DHT with successor backup replication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NodeArgs {
    /// Local gRPC port for this node (random if not specified)
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Hex node identifier (derived from the bound address if not specified)
    #[arg(long = "id")]
    id: Option<String>,
    /// JSON file with node settings
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Log debug output and periodic dumps of the node state
    #[arg(long = "debug")]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new bootstrap node (first node in the ring)
    #[command(name = "start-bootstrap")]
    StartBootstrap {
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Join an existing ring through a running node
    #[command(name = "join")]
    Join {
        #[command(flatten)]
        node: NodeArgs,
        /// Port of the node to join through
        #[arg(short = 'b', long = "bootstrap-port")]
        bootstrap_port: u16,
        /// Host of the node to join through
        #[arg(short = 'n', long = "host", default_value = "127.0.0.1")]
        host: String,
    },
}

fn init_logging(debug: bool) -> Result<(), String> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:<5})} {t} - {m}{n}",
        )))
        .build();
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| format!("Invalid logging config: {}", e))?;
    log4rs::init_config(config).map_err(|e| format!("Failed to initialize logging: {}", e))?;
    Ok(())
}

fn peer_config(args: &NodeArgs) -> Result<PeerConfig, String> {
    let mut node = match &args.config {
        Some(path) => NodeConfig::from_file(path).map_err(|e| e.to_string())?,
        None => NodeConfig::default(),
    };
    if let Some(id) = &args.id {
        node = node.with_id(id.clone());
    }
    Ok(PeerConfig {
        grpc_port: args.port,
        node,
        debug: args.debug,
        ..PeerConfig::default()
    })
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    let args = match &cli.command {
        Commands::StartBootstrap { node } => node,
        Commands::Join { node, .. } => node,
    };
    init_logging(args.debug)?;
    let config = peer_config(args)?;

    let mut peer = ChordPeer::new(config)
        .await
        .map_err(|e| format!("Failed to create peer: {}", e))?;
    let node_port = peer.get_port();

    match &cli.command {
        Commands::StartBootstrap { .. } => {
            peer.create_network();
            info!("Bootstrap node is running on port: {}", node_port);
            info!("Other nodes can join using: chordring join -b {} -p <PORT>", node_port);
        }
        Commands::Join { bootstrap_port, host, .. } => {
            let bootstrap_addr = format!("{}:{}", host, bootstrap_port);
            if let Err(e) = peer.join(&bootstrap_addr).await {
                error!("Failed to join ring: {}", e);
                peer.shutdown().await;
                return Err(format!("Failed to join ring: {}", e));
            }
            info!("Node is running on port: {}", node_port);
        }
    }

    if let Err(e) = peer.run().await {
        error!("Node error: {}", e);
        return Err(format!("Node error: {}", e));
    }

    info!("Node shut down gracefully");
    Ok(())
}
