use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use gacha_core::{
    Character,
    CharacterRates,
    CharacterWeight,
    ProbabilityConfig,
    Rarity,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    sync::Mutex,
    time::{
        Duration,
        Instant,
    },
};

pub const CONFIG_ROOT: &str = ".gacha-config";
const CONFIG_FILE: &str = "probability.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigEnv {
    Dev,
    Test,
    Local,
}

impl ConfigEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            ConfigEnv::Dev => "dev",
            ConfigEnv::Test => "test",
            ConfigEnv::Local => "local",
        }
    }
}

impl FromStr for ConfigEnv {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(ConfigEnv::Dev),
            "test" => Ok(ConfigEnv::Test),
            "local" => Ok(ConfigEnv::Local),
            other => Err(format!("unknown config env `{other}`; expected dev, test or local")),
        }
    }
}

impl fmt::Display for ConfigEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigEnv::Dev => "Development",
            ConfigEnv::Test => "Test",
            ConfigEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// What lands on disk: the table plus when it was last published.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub updated_at: String,
    pub config: ProbabilityConfig,
}

/// File-backed probability table for one environment, at
/// `<root>/<env>/probability.json`.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(env: ConfigEnv) -> Result<Self> {
        Self::at(CONFIG_ROOT, env)
    }

    pub fn at(root: impl AsRef<Path>, env: ConfigEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<ConfigRecord>> {
        read_record(&self.path)
    }

    /// Validates before writing; an invalid table never reaches the file.
    pub fn save(&self, config: ProbabilityConfig) -> Result<ConfigRecord> {
        config
            .validate()
            .context("Refusing to store invalid probability config")?;
        let record = ConfigRecord {
            updated_at: Utc::now().to_rfc3339(),
            config,
        };
        write_record(&self.path, &record)?;
        Ok(record)
    }
}

fn ensure_store(root: &Path, env: ConfigEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create config directory {}", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(CONFIG_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).with_context(|| {
            format!("Failed to create probability config for {env} at {file_path:?}")
        })?;
        file.write_all(b"").with_context(|| {
            format!("Failed to initialize probability config file for {env}")
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<ConfigRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read probability config")?;
    if data.is_empty() || data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<ConfigRecord>(&data) {
        return Ok(Some(record));
    }
    // hand-edited files may hold the bare table
    if let Ok(config) = serde_json::from_slice::<ProbabilityConfig>(&data) {
        return Ok(Some(ConfigRecord {
            updated_at: String::new(),
            config,
        }));
    }
    Err(anyhow!(
        "Failed to parse probability config JSON; expected a config record object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &ConfigRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize probability config")?;
    fs::write(path.as_ref(), json).context("Failed to write probability config")?;
    Ok(())
}

/// Supplies the table each draw runs against.
pub trait ProbabilityConfigProvider: Send + Sync {
    fn current(&self) -> Result<ProbabilityConfig>;
}

/// A fixed table, for tests and single-run tools.
#[derive(Clone, Debug)]
pub struct StaticConfigProvider {
    config: ProbabilityConfig,
}

impl StaticConfigProvider {
    pub fn new(config: ProbabilityConfig) -> Self {
        Self { config }
    }
}

impl ProbabilityConfigProvider for StaticConfigProvider {
    fn current(&self) -> Result<ProbabilityConfig> {
        Ok(self.config.clone())
    }
}

/// Re-reads the store at most once per `ttl`. A table that fails validation
/// is an error for every draw until it is fixed on disk.
pub struct CachedConfigProvider {
    store: ConfigStore,
    ttl: Duration,
    cached: Mutex<Option<(Instant, ProbabilityConfig)>>,
}

impl CachedConfigProvider {
    pub fn new(store: ConfigStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: Mutex::new(None),
        }
    }

    fn reload(&self) -> Result<ProbabilityConfig> {
        let record = self
            .store
            .load()?
            .ok_or_else(|| anyhow!("No probability config stored at {:?}", self.store.path()))?;
        record
            .config
            .validate()
            .context("Stored probability config is invalid")?;
        tracing::debug!("reloaded probability config ({})", record.updated_at);
        Ok(record.config)
    }
}

impl ProbabilityConfigProvider for CachedConfigProvider {
    fn current(&self) -> Result<ProbabilityConfig> {
        let mut guard = self
            .cached
            .lock()
            .map_err(|_| anyhow!("probability config cache poisoned"))?;
        if let Some((loaded_at, config)) = guard.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(config.clone());
            }
        }
        let config = self.reload()?;
        *guard = Some((Instant::now(), config.clone()));
        Ok(config)
    }
}

/// Starting table for the built-in roster: every character equally likely,
/// the same rarity curve for all of them.
pub fn default_config() -> ProbabilityConfig {
    let rarity_weights = [
        (Rarity::N, 40.0),
        (Rarity::R, 30.0),
        (Rarity::SR, 15.0),
        (Rarity::SSR, 10.0),
        (Rarity::UR, 4.0),
        (Rarity::LR, 1.0),
    ];
    ProbabilityConfig {
        loss_rate_percent: 60.0,
        characters: Character::ALL
            .into_iter()
            .map(|character| CharacterWeight {
                id: character.id(),
                weight: 1.0,
                active: true,
            })
            .collect(),
        per_character: Character::ALL
            .into_iter()
            .map(|character| {
                (
                    character.id(),
                    CharacterRates {
                        loss_override: None,
                        rarity_weights: rarity_weights.into_iter().collect(),
                        reversal_rate_percent: 15.0,
                    },
                )
            })
            .collect(),
        star_distribution: None,
    }
}
