//! Disk CSI Node Agent
//!
//! Runs the node service for a block-disk CSI plugin on one instance:
//! wires the host mount utility, the cloud provider and the sysfs tuner
//! into the node server and serves it over HTTP until interrupted.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use disk_csi_node::domain::ports::{CloudProviderRef, MountUtilRef};
use disk_csi_node::{
    ApiServer, ApiServerConfig, AzureCloud, Error, ImdsClient, ImdsConfig, NodeConfig,
    NodeLabelReader, NodeServer, Result, SysfsDeviceTuner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Disk CSI Node Agent - stage, publish and expand attached disks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file with the node configuration; flags below override it
    #[arg(long, env = "NODE_CONFIG")]
    config: Option<String>,

    /// Driver name used in the topology key
    #[arg(long, env = "DRIVER_NAME")]
    driver_name: Option<String>,

    /// Name of this node
    #[arg(long, env = "KUBE_NODE_NAME")]
    node_id: Option<String>,

    /// Region of this node
    #[arg(long, env = "LOCATION")]
    location: Option<String>,

    /// Report zone topology
    #[arg(long, env = "SUPPORT_ZONE")]
    support_zone: Option<bool>,

    /// Read zone and instance type from node labels
    #[arg(long, env = "GET_NODE_INFO_FROM_LABELS")]
    get_node_info_from_labels: Option<bool>,

    /// Use the instance metadata name as node ID
    #[arg(long, env = "GET_NODE_ID_FROM_IMDS")]
    get_node_id_from_imds: Option<bool>,

    /// Query the instance metadata service
    #[arg(long, env = "USE_INSTANCE_METADATA")]
    use_instance_metadata: Option<bool>,

    /// Static volume attach limit; negative resolves it from the VM size
    #[arg(long, env = "VOLUME_ATTACH_LIMIT")]
    volume_attach_limit: Option<i64>,

    /// Slots held back from the attach limit
    #[arg(long, env = "RESERVED_DATA_DISK_SLOT_NUM")]
    reserved_data_disk_slot_num: Option<i64>,

    /// Tune block queues for premium disks
    #[arg(long, env = "ENABLE_PERF_OPTIMIZATION")]
    enable_perf_optimization: Option<bool>,

    /// Rescan devices before expanding
    #[arg(long, env = "ENABLE_DISK_ONLINE_RESIZE")]
    enable_disk_online_resize: Option<bool>,

    /// Node API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "180")]
    request_timeout_secs: u64,

    /// Instance metadata endpoint
    #[arg(long, env = "IMDS_ENDPOINT", default_value = disk_csi_node::cloud::imds::DEFAULT_IMDS_ENDPOINT)]
    imds_endpoint: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run without a Kubernetes client (no node-label lookups)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_yaml_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(v) = &self.driver_name {
            config.driver_name = v.clone();
        }
        if let Some(v) = &self.node_id {
            config.node_id = v.clone();
        }
        if let Some(v) = &self.location {
            config.location = v.clone();
        }
        if let Some(v) = self.support_zone {
            config.support_zone = v;
        }
        if let Some(v) = self.get_node_info_from_labels {
            config.get_node_info_from_labels = v;
        }
        if let Some(v) = self.get_node_id_from_imds {
            config.get_node_id_from_imds = v;
        }
        if let Some(v) = self.use_instance_metadata {
            config.use_instance_metadata = v;
        }
        if let Some(v) = self.volume_attach_limit {
            config.volume_attach_limit = v;
        }
        if let Some(v) = self.reserved_data_disk_slot_num {
            config.reserved_data_disk_slot_num = v;
        }
        if let Some(v) = self.enable_perf_optimization {
            config.enable_perf_optimization = v;
        }
        if let Some(v) = self.enable_disk_online_resize {
            config.enable_disk_online_resize = v;
        }

        if config.node_id.is_empty() {
            return Err(Error::Configuration("node ID must be set (--node-id)".into()));
        }
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.node_config()?;

    info!("Starting disk CSI node agent");
    info!("  Version: {}", disk_csi_node::VERSION);
    info!("  Driver: {}", config.driver_name);
    info!("  Node: {}", config.node_id);
    info!("  API: {}", args.api_addr);
    info!("  Standalone mode: {}", args.standalone);

    let cloud = build_cloud(&args, &config).await?;
    let mounter = host_mounter()?;
    let tuner = Arc::new(SysfsDeviceTuner::default());
    let node = Arc::new(NodeServer::new(config, mounter, cloud, tuner));

    let api_config = ApiServerConfig {
        addr: args
            .api_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid API address: {}", e)))?,
        request_timeout_secs: args.request_timeout_secs,
    };
    let api_server = Arc::new(ApiServer::new(api_config, node));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        signal_server.shutdown();
    });

    api_server.run().await?;

    info!("Node agent shutdown complete");
    Ok(())
}

async fn build_cloud(args: &Args, config: &NodeConfig) -> Result<CloudProviderRef> {
    let imds = if config.use_instance_metadata {
        Some(ImdsClient::new(ImdsConfig {
            endpoint: args.imds_endpoint.clone(),
            ..Default::default()
        })?)
    } else {
        None
    };

    let labels = if args.standalone {
        None
    } else {
        match tokio::time::timeout(Duration::from_secs(10), kube::Client::try_default()).await {
            Ok(Ok(client)) => Some(NodeLabelReader::new(client)),
            Ok(Err(e)) => {
                warn!("Kubernetes client unavailable, node labels disabled: {}", e);
                None
            }
            Err(_) => {
                warn!("Kubernetes client setup timed out, node labels disabled");
                None
            }
        }
    };

    Ok(Arc::new(AzureCloud::new(imds, labels)))
}

#[cfg(unix)]
fn host_mounter() -> Result<MountUtilRef> {
    Ok(Arc::new(disk_csi_node::SystemMounter::new()))
}

#[cfg(not(unix))]
fn host_mounter() -> Result<MountUtilRef> {
    Err(Error::Configuration(
        "no mount utility is available for this host platform".into(),
    ))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info", "reqwest=info"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
