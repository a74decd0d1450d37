use crate::{
    ids::CharacterId,
    rarity::Rarity,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::{
    BTreeMap,
    BTreeSet,
};

/// Allowed drift between an active character's rarity weights and 100.
pub const RARITY_SUM_TOLERANCE: f64 = 0.1;

/// Number of star levels a star distribution must cover.
pub const STAR_LEVELS: usize = 12;

/// Snapshot of the probability tables used by a single draw.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilityConfig {
    pub loss_rate_percent: f64,
    #[serde(default)]
    pub characters: Vec<CharacterWeight>,
    #[serde(default)]
    pub per_character: BTreeMap<CharacterId, CharacterRates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_distribution: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterWeight {
    pub id: CharacterId,
    pub weight: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_override: Option<f64>,
    #[serde(default)]
    pub rarity_weights: BTreeMap<Rarity, f64>,
    #[serde(default)]
    pub reversal_rate_percent: f64,
}

impl CharacterRates {
    pub fn rarity_weight(&self, rarity: Rarity) -> f64 {
        self.rarity_weights.get(&rarity).copied().unwrap_or(0.0)
    }

    pub fn rarity_total(&self) -> f64 {
        self.rarity_weights.values().copied().sum()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("loss rate {0} is outside 0..=100")]
    LossRateOutOfRange(f64),
    #[error("character {0} is listed more than once")]
    DuplicateCharacter(CharacterId),
    #[error("character {character} has invalid weight {weight}")]
    InvalidWeight { character: CharacterId, weight: f64 },
    #[error("active character {0} has no rarity weights configured")]
    MissingRates(CharacterId),
    #[error("rarity weights for {character} sum to {sum}, expected 100")]
    RarityWeightsSum { character: CharacterId, sum: f64 },
    #[error("{field} for {character} is outside 0..=100: {value}")]
    RateOutOfRange {
        character: CharacterId,
        field: &'static str,
        value: f64,
    },
    #[error("star distribution needs 12 entries, got {0}")]
    StarDistributionLength(usize),
    #[error("no active character with a positive weight")]
    NoActiveCharacters,
}

impl ProbabilityConfig {
    pub fn rates_for(&self, character: &CharacterId) -> Option<&CharacterRates> {
        self.per_character.get(character)
    }

    pub fn active_characters(&self) -> impl Iterator<Item = &CharacterWeight> {
        self.characters
            .iter()
            .filter(|c| c.active && c.weight.is_finite() && c.weight > 0.0)
    }

    /// Checks the table the way the admin store does before publishing it.
    /// Draws never call this; they normalise whatever they are handed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.loss_rate_percent) {
            return Err(ConfigError::LossRateOutOfRange(self.loss_rate_percent));
        }

        let mut seen = BTreeSet::new();
        for character in &self.characters {
            if !seen.insert(&character.id) {
                return Err(ConfigError::DuplicateCharacter(character.id.clone()));
            }
            if !character.weight.is_finite() || character.weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    character: character.id.clone(),
                    weight: character.weight,
                });
            }
        }

        if self.active_characters().next().is_none() {
            return Err(ConfigError::NoActiveCharacters);
        }

        for character in self.active_characters() {
            let rates = self
                .rates_for(&character.id)
                .ok_or_else(|| ConfigError::MissingRates(character.id.clone()))?;
            let sum = rates.rarity_total();
            if (sum - 100.0).abs() > RARITY_SUM_TOLERANCE {
                return Err(ConfigError::RarityWeightsSum {
                    character: character.id.clone(),
                    sum,
                });
            }
            check_percent(&character.id, "reversal rate", rates.reversal_rate_percent)?;
            if let Some(loss) = rates.loss_override {
                check_percent(&character.id, "loss override", loss)?;
            }
        }

        if let Some(distribution) = &self.star_distribution {
            if distribution.len() != STAR_LEVELS {
                return Err(ConfigError::StarDistributionLength(distribution.len()));
            }
        }
        Ok(())
    }
}

fn check_percent(
    character: &CharacterId,
    field: &'static str,
    value: f64,
) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RateOutOfRange {
            character: character.clone(),
            field,
            value,
        })
    }
}
