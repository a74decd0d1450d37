use anyhow::Context;
use clap::Parser;
use collection_cache::app::{
    init_tracing,
    request::ApiKey,
};
use gacha_config::{
    CONFIG_ROOT,
    CachedConfigProvider,
    ConfigEnv,
    ConfigStore,
    default_config,
};
use gacha_core::{
    AssetPaths,
    roster::{
        DEFAULT_ASSET_BASE,
        catalog,
    },
};
use gacha_server::{
    api::ActixGachaApi,
    cache_client::CollectionCacheClient,
    emitter::{
        CollectionEmitter,
        HttpCollectionEmitter,
        NoopEmitter,
    },
    ledger::{
        LedgerStore,
        PullLedger,
        sled_store::SledLedgerStore,
    },
    orchestrator::Orchestrator,
    sweep::spawn_sweep,
};
use std::{
    env::current_dir,
    fs,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::runtime::Handle;

#[derive(Parser, Debug)]
#[command(version, about = "Gacha draw and pull ledger service", long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, env = "GACHA_SERVER_PORT")]
    port: Option<u16>,

    #[arg(long, env = "GACHA_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory holding `<env>/probability.json`.
    #[arg(long, default_value = CONFIG_ROOT)]
    config_root: PathBuf,

    #[arg(long, default_value = "local")]
    config_env: ConfigEnv,

    /// How long a loaded probability table is reused before re-reading it.
    #[arg(long, default_value_t = 30)]
    config_ttl_secs: u64,

    /// Write the built-in table when none is stored yet.
    #[arg(long, default_value = "false")]
    seed_default_config: bool,

    /// Base URL of the collection cache. Without it no events are sent.
    #[arg(long, env = "COLLECTION_CACHE_URL")]
    cache_url: Option<String>,

    #[arg(long, env = "COLLECTION_API_KEY", hide_env_values = true)]
    cache_api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_ASSET_BASE)]
    asset_base: String,

    #[arg(long, default_value_t = 600)]
    sweep_interval_secs: u64,

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

fn config_provider(args: &Args) -> anyhow::Result<CachedConfigProvider> {
    let store = ConfigStore::at(&args.config_root, args.config_env)?;
    if store.load()?.is_none() {
        if args.seed_default_config {
            store.save(default_config())?;
            tracing::info!("Seeded default probability config at {:?}", store.path());
        } else {
            tracing::warn!(
                "No probability config at {:?}; draws answer 503 until one is stored",
                store.path()
            );
        }
    }
    Ok(CachedConfigProvider::new(
        store,
        Duration::from_secs(args.config_ttl_secs),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = if args.tracing {
        init_tracing(args.log_dir.as_deref(), "gacha-server.log")
    } else {
        None
    };

    let storage_path = match &args.data_dir {
        Some(path) => path.clone(),
        None => current_dir()
            .context("determine process working directory")?
            .join("gacha_ledger_data"),
    };
    fs::create_dir_all(&storage_path)?;
    tracing::info!("Using sled storage directory {}", storage_path.display());
    let store = SledLedgerStore::open(&storage_path)?;
    let seeded = store.seed_cards(&catalog())?;
    if seeded > 0 {
        tracing::info!("Seeded {seeded} catalog cards");
    }

    let cache = match &args.cache_url {
        Some(url) => {
            let key = args
                .cache_api_key
                .clone()
                .context("--cache-api-key is required with --cache-url")?;
            Some(CollectionCacheClient::new(url, key)?)
        }
        None => None,
    };
    let mut dispatcher = None;
    let emitter: Arc<dyn CollectionEmitter> = match &cache {
        Some(client) => {
            let (emitter, task) = HttpCollectionEmitter::spawn(client.clone(), &Handle::current());
            tracing::info!("Emitting collection events to {}", client.base_url());
            dispatcher = Some(task);
            Arc::new(emitter)
        }
        None => Arc::new(NoopEmitter),
    };

    let ledger = PullLedger::new(store, emitter);
    let sweep = spawn_sweep(
        ledger.clone(),
        Duration::from_secs(args.sweep_interval_secs.max(1)),
        &Handle::current(),
    );
    let orchestrator = Orchestrator::new(
        ledger,
        Arc::new(config_provider(&args)?),
        AssetPaths::new(args.asset_base.clone()),
    );

    let api = ActixGachaApi::new(
        &args.host,
        args.port,
        ApiKey::new(args.api_key.clone()),
        orchestrator,
        cache,
    )
    .context("starting gacha API")?;
    tracing::info!("Gacha server ready at {}", api.base_url());

    handle_interupt().await;
    sweep.abort();
    api.shutdown().await;
    if let Some(dispatcher) = dispatcher {
        dispatcher.abort();
    }
    tracing::info!("Exiting gacha server");
    Ok(())
}
