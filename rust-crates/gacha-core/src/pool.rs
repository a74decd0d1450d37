use crate::{
    ids::{
        CardId,
        CharacterId,
    },
    rarity::Rarity,
};
use serde::{
    Deserialize,
    Serialize,
};

/// A card row as the draw sees it: catalog data plus its supply counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardStock {
    pub card_id: CardId,
    pub character_id: CharacterId,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    pub rarity: Rarity,
    pub star_rating: u8,
    pub active: bool,
    #[serde(default)]
    pub loss_card: bool,
    /// `None` means unlimited.
    #[serde(default)]
    pub max_supply: Option<u32>,
    #[serde(default)]
    pub current_supply: u32,
    /// Cards that can reverse into this one.
    #[serde(default)]
    pub reversal_origins: Vec<CardId>,
}

impl CardStock {
    pub fn has_supply(&self) -> bool {
        match self.max_supply {
            Some(max) => self.current_supply < max,
            None => true,
        }
    }

    /// Active, in stock and not the loss sentinel.
    pub fn is_playable(&self) -> bool {
        self.active && !self.loss_card && self.has_supply()
    }
}

/// Card table snapshot handed to the engine for one draw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardPool {
    cards: Vec<CardStock>,
}

impl CardPool {
    pub fn new(cards: Vec<CardStock>) -> Self {
        Self { cards }
    }

    pub fn cards(&self) -> &[CardStock] {
        &self.cards
    }

    pub fn find(&self, card_id: &CardId) -> Option<&CardStock> {
        self.cards.iter().find(|card| &card.card_id == card_id)
    }

    /// The sentinel used for losses. Active sentinels win over inactive ones.
    pub fn loss_card(&self) -> Option<&CardStock> {
        self.cards
            .iter()
            .filter(|card| card.loss_card)
            .max_by_key(|card| card.active)
    }

    pub fn playable_for<'a>(
        &'a self,
        character: &CharacterId,
    ) -> impl Iterator<Item = &'a CardStock> + use<'a> {
        let character = character.clone();
        self.cards
            .iter()
            .filter(move |card| card.character_id == character && card.is_playable())
    }

    pub fn has_playable(&self, character: &CharacterId) -> bool {
        self.playable_for(character).next().is_some()
    }

    /// Counts one draw of `card_id` against its supply so later draws from the
    /// same pool see it. Returns `false` for unknown cards.
    pub fn reserve(&mut self, card_id: &CardId) -> bool {
        match self.cards.iter_mut().find(|card| &card.card_id == card_id) {
            Some(card) => {
                card.current_supply = card.current_supply.saturating_add(1);
                true
            }
            None => false,
        }
    }
}

impl From<Vec<CardStock>> for CardPool {
    fn from(cards: Vec<CardStock>) -> Self {
        Self::new(cards)
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use super::*;

    pub fn card(id: &str, character: &str, rarity: Rarity) -> CardStock {
        CardStock {
            card_id: CardId::new(id),
            character_id: CharacterId::new(character),
            name: id.to_string(),
            title: None,
            image_path: None,
            rarity,
            star_rating: 1,
            active: true,
            loss_card: false,
            max_supply: None,
            current_supply: 0,
            reversal_origins: Vec::new(),
        }
    }

    pub fn loss_card(id: &str, character: &str) -> CardStock {
        CardStock {
            loss_card: true,
            ..card(id, character, Rarity::N)
        }
    }
}
