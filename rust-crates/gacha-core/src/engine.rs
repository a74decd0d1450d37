//! Turns a probability table and a card pool into one concrete outcome.
//!
//! A draw consumes rolls in a fixed order so a scripted sequence reproduces
//! it exactly:
//! 1. loss roll against the global loss rate
//! 2. weighted character pick
//! 3. loss override roll, only when the character declares one
//! 4. weighted rarity pick
//! 5. star level pick, only when a star distribution is configured
//! 6. uniform card pick
//! 7. reversal roll, only when the card is the destination of a route
use crate::{
    config::{
        CharacterRates,
        CharacterWeight,
        ProbabilityConfig,
        STAR_LEVELS,
    },
    outcome::DrawOutcome,
    pool::{
        CardPool,
        CardStock,
    },
    rarity::Rarity,
    weighted::{
        RollSource,
        pick_uniform,
        pick_weighted,
    },
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DrawError {
    #[error("no active character with a positive weight")]
    NoActiveCharacters,
    #[error("no active character has a playable card left")]
    NoPlayableCards,
    #[error("a loss was drawn but no loss card is configured")]
    MissingLossCard,
}

pub fn resolve<R>(
    config: &ProbabilityConfig,
    pool: &CardPool,
    rolls: &mut R,
) -> Result<DrawOutcome, DrawError>
where
    R: RollSource + ?Sized,
{
    let active: Vec<&CharacterWeight> = config.active_characters().collect();
    if active.is_empty() {
        return Err(DrawError::NoActiveCharacters);
    }

    if rolls.percent() < config.loss_rate_percent {
        return loss_outcome(pool);
    }

    let eligible: Vec<&CharacterWeight> = active
        .into_iter()
        .filter(|character| pool.has_playable(&character.id))
        .collect();
    if eligible.is_empty() {
        return Err(DrawError::NoPlayableCards);
    }

    let character = pick_weighted(&eligible, |c| c.weight, rolls)
        .map(|c| c.id.clone())
        .ok_or(DrawError::NoPlayableCards)?;
    let rates = config.rates_for(&character);

    if let Some(loss_override) = rates.and_then(|r| r.loss_override) {
        if rolls.percent() < loss_override {
            tracing::debug!(%character, "loss override turned draw into a loss");
            return loss_outcome(pool);
        }
    }

    let playable: Vec<&CardStock> = pool.playable_for(&character).collect();
    let mut candidates = rarity_candidates(&playable, rates, rolls);

    if let Some(star) = config
        .star_distribution
        .as_deref()
        .and_then(|distribution| pick_star(distribution, rolls))
    {
        let narrowed: Vec<&CardStock> = candidates
            .iter()
            .copied()
            .filter(|card| card.star_rating == star)
            .collect();
        if !narrowed.is_empty() {
            candidates = narrowed;
        }
    }

    let card = pick_uniform(&candidates, rolls)
        .copied()
        .ok_or(DrawError::NoPlayableCards)?;

    let reversal_rate = rates.map(|r| r.reversal_rate_percent).unwrap_or(0.0);
    let reversal_origin = card
        .reversal_origins
        .first()
        .filter(|_| rolls.percent() < reversal_rate);

    Ok(DrawOutcome {
        is_loss: false,
        character_id: character,
        card_id: card.card_id.clone(),
        rarity: card.rarity,
        star_rating: card.star_rating,
        is_reversal: reversal_origin.is_some(),
        reversal_from_card_id: reversal_origin.cloned(),
        reversal_from_rarity: reversal_origin
            .and_then(|origin| pool.find(origin))
            .map(|origin| origin.rarity),
    })
}

fn loss_outcome(pool: &CardPool) -> Result<DrawOutcome, DrawError> {
    let card = pool.loss_card().ok_or(DrawError::MissingLossCard)?;
    Ok(DrawOutcome {
        is_loss: true,
        character_id: card.character_id.clone(),
        card_id: card.card_id.clone(),
        rarity: card.rarity,
        star_rating: card.star_rating,
        is_reversal: false,
        reversal_from_card_id: None,
        reversal_from_rarity: None,
    })
}

/// Cards of the drawn rarity, or every playable card when the rarity table is
/// empty or the drawn tier has nothing left.
fn rarity_candidates<'a, R>(
    playable: &[&'a CardStock],
    rates: Option<&CharacterRates>,
    rolls: &mut R,
) -> Vec<&'a CardStock>
where
    R: RollSource + ?Sized,
{
    let tiers: Vec<(Rarity, f64)> = Rarity::ALL
        .into_iter()
        .map(|rarity| (rarity, rates.map(|r| r.rarity_weight(rarity)).unwrap_or(0.0)))
        .collect();
    let Some((rarity, _)) = pick_weighted(&tiers, |(_, weight)| *weight, rolls) else {
        return playable.to_vec();
    };
    let matching: Vec<&CardStock> = playable
        .iter()
        .copied()
        .filter(|card| card.rarity == *rarity)
        .collect();
    if matching.is_empty() {
        tracing::debug!(%rarity, "rarity tier exhausted, falling back to any playable card");
        playable.to_vec()
    } else {
        matching
    }
}

fn pick_star<R>(distribution: &[f64], rolls: &mut R) -> Option<u8>
where
    R: RollSource + ?Sized,
{
    if distribution.len() != STAR_LEVELS {
        return None;
    }
    let levels: Vec<(u8, f64)> = (1u8..).zip(distribution.iter().copied()).collect();
    pick_weighted(&levels, |(_, weight)| *weight, rolls).map(|(star, _)| *star)
}
