pub mod config;

pub mod engine;

pub mod ids;

pub mod outcome;

pub mod pool;

pub mod presentation;

pub mod rarity;

pub mod roster;

pub mod weighted;

pub use config::{
    CharacterRates,
    CharacterWeight,
    ConfigError,
    ProbabilityConfig,
};
pub use engine::{
    DrawError,
    resolve,
};
pub use ids::{
    CardId,
    CharacterId,
};
pub use outcome::DrawOutcome;
pub use pool::{
    CardPool,
    CardStock,
};
pub use presentation::{
    PlaybackPhase,
    PresentationPlan,
};
pub use rarity::Rarity;
pub use roster::{
    AssetPaths,
    Character,
};
pub use weighted::RollSource;
