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

/// One resolved draw. Losses still reference the loss sentinel card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawOutcome {
    pub is_loss: bool,
    pub character_id: CharacterId,
    pub card_id: CardId,
    pub rarity: Rarity,
    pub star_rating: u8,
    pub is_reversal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_from_card_id: Option<CardId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_from_rarity: Option<Rarity>,
}
