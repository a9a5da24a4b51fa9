//! vdisk node - Storage node daemon
//!
//! Builds the node context, operation registry and dispatcher, optionally
//! formats the cluster, then serves until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};
use vdisk_common::{Config, Node, OpResult, ResultCode};
use vdisk_ops::{
    Dispatcher, LogLevelControl, NodeContext, NodeOptions, Opcode, Request, StaticMembership,
};
use vdisk_store::{MemoryStore, PlainStore, StoreDrivers};

#[derive(Parser, Debug)]
#[command(name = "vdisk-node")]
#[command(about = "vdisk storage node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/vdisk/node.toml")]
    config: PathBuf,

    /// Address this node is known by
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Store driver used when formatting
    #[arg(long)]
    store: Option<String>,

    /// Default number of copies
    #[arg(long)]
    copies: Option<u8>,

    /// Work-stage worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Object size in bytes
    #[arg(long)]
    object_size: Option<u64>,

    /// Directory for node state and the plain store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Format the cluster at start-up, wiping the store
    #[arg(long)]
    format: bool,

    /// Log level
    #[arg(long, env = "VDISK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Configuration file and environment, overridden by the command line
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(&args.config)?;

    if let Some(listen) = args.listen {
        config.node.listen = listen;
    }
    if let Some(store) = &args.store {
        config.cluster.store.clone_from(store);
    }
    if let Some(copies) = args.copies {
        config.cluster.copies = copies;
    }
    if let Some(workers) = args.workers {
        config.io.worker_threads = workers;
    }
    if let Some(object_size) = args.object_size {
        config.cluster.object_size = object_size;
    }
    if let Some(data_dir) = &args.data_dir {
        config.node.data_dir.clone_from(data_dir);
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config.logging.json |= args.log_json;

    config.validate()?;
    Ok(config)
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

fn init_tracing(level: &str, json: bool) -> FilterHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    handle
}

/// Log filter SET_LOGLEVEL swaps in place
struct ReloadableFilter(FilterHandle);

impl LogLevelControl for ReloadableFilter {
    fn level(&self) -> LevelFilter {
        self.0
            .with_current(|filter| filter.max_level_hint())
            .ok()
            .flatten()
            .unwrap_or_else(LevelFilter::current)
    }

    fn set_level(&self, level: LevelFilter) -> OpResult {
        self.0
            .reload(EnvFilter::new(level.to_string()))
            .map_err(|e| {
                warn!("failed to reload log filter: {}", e);
                ResultCode::SystemError
            })
    }
}

fn store_drivers(config: &Config) -> StoreDrivers {
    let object_size = config.cluster.object_size;
    let mut drivers = StoreDrivers::new();
    drivers.register(Arc::new(MemoryStore::new(object_size)));
    drivers.register(Arc::new(PlainStore::new(
        config.node.data_dir.join("obj"),
        object_size,
    )));
    drivers
}

async fn format(dispatcher: &Dispatcher, local: &Node, config: &Config) -> Result<()> {
    let mut req =
        Request::new(Opcode::MakeFs, local.clone()).with_data(config.cluster.store.as_bytes());
    req.header.cluster.copies = config.cluster.copies;

    let resp = dispatcher.submit(req).await;
    if !resp.result().is_success() {
        anyhow::bail!(
            "failed to format with store {}: {}",
            config.cluster.store,
            resp.result()
        );
    }
    info!("cluster formatted with store {}", config.cluster.store);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let filter = init_tracing(&config.logging.level, config.logging.json);

    info!("Starting vdisk node");
    info!("Config file: {}", args.config.display());
    info!("Listen address: {}", config.node.listen);
    info!("Data directory: {}", config.node.data_dir.display());
    info!(
        "Object size: {} bytes, default copies: {}",
        config.cluster.object_size, config.cluster.copies
    );

    if config.io.enable_object_cache {
        warn!("object cache requested but no cache backend is built in; running without it");
    }

    let mut local = Node::new(config.node.listen);
    local.zone = config.node.zone;
    let membership = Arc::new(StaticMembership::new(local.clone()));
    let ctx = NodeContext::new(
        NodeOptions::from(&config),
        store_drivers(&config),
        membership,
        None,
    );
    ctx.set_log_control(Arc::new(ReloadableFilter(filter)));

    let dispatcher = Dispatcher::builder()
        .workers(config.io.worker_threads)
        .queue_depth(config.io.main_queue_depth)
        .start(Arc::clone(&ctx), vdisk_ops::default_registry()?);

    if args.format || config.cluster.auto_format {
        format(&dispatcher, &local, &config).await?;
    } else {
        info!("waiting for format");
    }

    info!("node {} up, status {:?}", local.id, ctx.status());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let resp = dispatcher
        .submit(Request::new(Opcode::Shutdown, local))
        .await;
    if !resp.result().is_success() {
        warn!("shutdown request failed: {}", resp.result());
    }
    Ok(())
}
