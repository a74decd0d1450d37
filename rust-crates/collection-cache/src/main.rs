use anyhow::Context;
use clap::Parser;
use collection_cache::app::{
    actix_collection_api::ActixCollectionApi,
    actor::CollectionActors,
    init_tracing,
    request::ApiKey,
    sled_storage::SledSnapshotStorage,
};
use std::{
    env::current_dir,
    fs,
    path::PathBuf,
    time::Duration,
};
use tokio::runtime::Handle;

#[derive(Parser, Debug)]
#[command(version, about = "Per-user collection cache", long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, env = "COLLECTION_CACHE_PORT")]
    port: Option<u16>,

    #[arg(long, env = "COLLECTION_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds an actor may sit idle before it is evicted.
    #[arg(long, default_value_t = 300)]
    idle_secs: u64,

    #[arg(short, long, default_value = "false")]
    tracing: bool,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = if args.tracing {
        init_tracing(args.log_dir.as_deref(), "collection-cache.log")
    } else {
        None
    };

    let storage_path = match &args.data_dir {
        Some(path) => path.clone(),
        None => current_dir()
            .context("determine process working directory")?
            .join("collection_cache_data"),
    };
    fs::create_dir_all(&storage_path)?;
    tracing::info!("Using sled storage directory {}", storage_path.display());
    let storage = SledSnapshotStorage::open(&storage_path)?;

    let actors = CollectionActors::new(storage, Handle::current());
    let idle = Duration::from_secs(args.idle_secs);
    let eviction = actors.spawn_eviction(idle.max(Duration::from_secs(1)), idle);

    let api = ActixCollectionApi::new(&args.host, args.port, ApiKey::new(args.api_key), actors)
        .context("starting collection API")?;
    tracing::info!("Collection cache ready at {}", api.base_url());

    handle_interupt().await;
    eviction.abort();
    api.shutdown().await;
    tracing::info!("Exiting collection cache");
    Ok(())
}
