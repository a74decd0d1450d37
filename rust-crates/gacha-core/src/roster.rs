//! Built-in character registry: card tables, reversal routes and the asset
//! layout each character's presentation is played from.
use crate::{
    ids::{
        CardId,
        CharacterId,
    },
    pool::CardStock,
    rarity::Rarity,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub const CARDS_PER_CHARACTER: usize = 12;
pub const PRE_SCENE_PATTERNS: [char; 4] = ['A', 'B', 'C', 'D'];
pub const PRE_SCENE_STEPS: u8 = 2;
pub const CHANCE_PATTERNS: [char; 4] = ['A', 'B', 'C', 'D'];
pub const REVERSAL_STEPS: u8 = 2;
pub const LOSS_CARD_KEY: &str = "loss";
pub const DEFAULT_ASSET_BASE: &str = "/videos";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Character {
    Kenta,
    Shoichi,
    Tatumi,
    Yahei,
    Reiko,
}

impl Character {
    pub const ALL: [Character; 5] = [
        Character::Kenta,
        Character::Shoichi,
        Character::Tatumi,
        Character::Yahei,
        Character::Reiko,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Character::Kenta => "kenta",
            Character::Shoichi => "shoichi",
            Character::Tatumi => "tatumi",
            Character::Yahei => "yahei",
            Character::Reiko => "reiko",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.slug() == slug)
    }

    pub fn id(self) -> CharacterId {
        CharacterId::new(self.slug())
    }

    pub fn profile(self) -> CharacterProfile {
        let (display_name, cards, routes) = match self {
            Character::Kenta => ("Kenta", &KENTA_CARDS, KENTA_ROUTES),
            Character::Shoichi => ("Shoichi", &SHOICHI_CARDS, SHOICHI_ROUTES),
            Character::Tatumi => ("Tatumi", &TATUMI_CARDS, TATUMI_ROUTES),
            Character::Yahei => ("Yahei", &YAHEI_CARDS, YAHEI_ROUTES),
            Character::Reiko => ("Reiko", &REIKO_CARDS, REIKO_ROUTES),
        };
        CharacterProfile {
            character: self,
            display_name,
            cards,
            routes,
        }
    }
}

impl fmt::Display for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// One card in a character's table. Rarity, star level and scene length
/// follow from its position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardDef {
    pub key: &'static str,
    pub name: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReversalRoute {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Clone, Copy, Debug)]
pub struct CharacterProfile {
    pub character: Character,
    pub display_name: &'static str,
    cards: &'static [CardDef; CARDS_PER_CHARACTER],
    routes: &'static [ReversalRoute],
}

impl CharacterProfile {
    pub fn cards(&self) -> &'static [CardDef] {
        self.cards
    }

    pub fn routes(&self) -> &'static [ReversalRoute] {
        self.routes
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.cards.iter().position(|card| card.key == key)
    }

    pub fn card(&self, key: &str) -> Option<&'static CardDef> {
        self.cards.iter().find(|card| card.key == key)
    }

    pub fn main_scene_steps(&self, key: &str) -> Option<u8> {
        self.position(key).map(main_scene_steps_at)
    }

    /// First route ending at `to`; reversal scenes are played from it.
    pub fn route_into(&self, to: &str) -> Option<&'static ReversalRoute> {
        self.routes.iter().find(|route| route.to == to)
    }

    pub fn card_id(&self, key: &str) -> CardId {
        CardId::new(format!("{}:{key}", self.character.slug()))
    }

    /// Catalog rows for every card of this character, ready to seed a store.
    pub fn stock(&self) -> Vec<CardStock> {
        let assets = AssetPaths::default();
        self.cards
            .iter()
            .enumerate()
            .map(|(index, card)| CardStock {
                card_id: self.card_id(card.key),
                character_id: self.character.id(),
                name: card.name.to_string(),
                title: None,
                image_path: Some(assets.card_image(self.character, card.key)),
                rarity: rarity_at(index),
                star_rating: star_at(index),
                active: true,
                loss_card: false,
                max_supply: None,
                current_supply: 0,
                reversal_origins: self
                    .routes
                    .iter()
                    .filter(|route| route.to == card.key)
                    .map(|route| self.card_id(route.from))
                    .collect(),
            })
            .collect()
    }
}

fn rarity_at(index: usize) -> Rarity {
    Rarity::ALL[(index / 2).min(Rarity::ALL.len() - 1)]
}

fn star_at(index: usize) -> u8 {
    u8::try_from(index + 1).unwrap_or(u8::MAX)
}

fn main_scene_steps_at(index: usize) -> u8 {
    match index {
        0 | 1 => 2,
        2..=5 => 3,
        6..=9 => 4,
        _ => 5,
    }
}

/// Card id of the shared loss sentinel.
pub fn loss_card_id() -> CardId {
    CardId::new(format!("{}:{LOSS_CARD_KEY}", Character::Kenta.slug()))
}

/// The full built-in catalog: every character's cards plus the loss sentinel.
pub fn catalog() -> Vec<CardStock> {
    let assets = AssetPaths::default();
    let mut cards: Vec<CardStock> = Character::ALL
        .into_iter()
        .flat_map(|character| character.profile().stock())
        .collect();
    cards.push(CardStock {
        card_id: loss_card_id(),
        character_id: Character::Kenta.id(),
        name: "Reincarnation failed".to_string(),
        title: Some("This next life could not be found".to_string()),
        image_path: Some(assets.loss_card_image()),
        rarity: Rarity::N,
        star_rating: 0,
        active: true,
        loss_card: true,
        max_supply: None,
        current_supply: 0,
        reversal_origins: Vec::new(),
    });
    cards
}

/// Splits a roster card id into its character and card key.
pub fn split_card_id(card_id: &CardId) -> Option<(Character, &str)> {
    let (slug, key) = card_id.as_str().split_once(':')?;
    Some((Character::from_slug(slug)?, key))
}

/// Builds asset paths under a base such as `/videos` or a CDN origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetPaths {
    base: String,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_BASE)
    }
}

impl AssetPaths {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = match base.trim_end_matches('/') {
            "" => String::new(),
            trimmed => trimmed.to_string(),
        };
        Self { base }
    }

    fn character_asset(&self, character: Character, folder: &str, file: &str) -> String {
        format!("{}/characters/{}/{folder}/{file}", self.base, character.slug())
    }

    pub fn title_video(&self, character: Character, card_key: &str) -> String {
        let slug = character.slug();
        let file = format!("{slug}_title_{}.mp4", card_code(card_key));
        self.character_asset(character, "title", &file)
    }

    pub fn pre_scene_video(&self, character: Character, pattern: char, step: u8) -> String {
        let slug = character.slug();
        let file = format!("{slug}_pre_{}{step}.mp4", pattern.to_ascii_lowercase());
        self.character_asset(character, "pre", &file)
    }

    pub fn chance_video(&self, character: Character, pattern: char) -> String {
        let slug = character.slug();
        let file = format!("{slug}_chance_{}.mp4", pattern.to_ascii_lowercase());
        self.character_asset(character, "chance", &file)
    }

    pub fn main_scene_video(&self, character: Character, card_key: &str, step: u8) -> String {
        let slug = character.slug();
        let file = format!("{slug}_{}_{step}.mp4", card_code(card_key));
        self.character_asset(character, "main", &file)
    }

    pub fn reversal_video(
        &self,
        character: Character,
        from_key: &str,
        to_key: &str,
        step: u8,
    ) -> String {
        let slug = character.slug();
        let file = format!(
            "{slug}_rev_{}_{}_{step}.mp4",
            card_code(from_key),
            card_code(to_key)
        );
        self.character_asset(character, "donden", &file)
    }

    /// Card art lives outside the video tree.
    pub fn card_image(&self, character: Character, card_key: &str) -> String {
        match character {
            Character::Reiko => format!("/reiko_cards_v2/{card_key}.png"),
            other => format!("/{}_cards/{card_key}.png", other.slug()),
        }
    }

    pub fn loss_card_image(&self) -> String {
        format!("{}/common/loss_card.png", self.base)
    }
}

/// `card05_ramen` and `reiko_card05` both map to `c05`.
pub fn card_code(card_key: &str) -> String {
    let digits: String = card_key
        .split_once("card")
        .map(|(_, rest)| rest.chars().take_while(char::is_ascii_digit).collect())
        .unwrap_or_default();
    if digits.is_empty() {
        format!("c{card_key}")
    } else {
        format!("c{digits:0>2}")
    }
}

const fn card(key: &'static str, name: &'static str) -> CardDef {
    CardDef { key, name }
}

const fn route(from: &'static str, to: &'static str) -> ReversalRoute {
    ReversalRoute { from, to }
}

static KENTA_CARDS: [CardDef; CARDS_PER_CHARACTER] = [
    card("card01_convenience", "Convenience store clerk"),
    card("card02_warehouse", "Warehouse worker"),
    card("card03_youtuber", "Struggling YouTuber"),
    card("card04_civil_servant", "Civil servant"),
    card("card05_ramen", "Ramen shop owner"),
    card("card06_boxer", "Boxer"),
    card("card07_surgeon", "Surgeon"),
    card("card08_business_owner", "Business owner"),
    card("card09_mercenary", "Mercenary"),
    card("card10_rockstar", "Rock star"),
    card("card11_demon_king", "Demon king"),
    card("card12_hero", "Hero"),
];

static KENTA_ROUTES: &[ReversalRoute] = &[
    route("card01_convenience", "card05_ramen"),
    route("card01_convenience", "card07_surgeon"),
    route("card02_warehouse", "card06_boxer"),
    route("card02_warehouse", "card08_business_owner"),
    route("card03_youtuber", "card10_rockstar"),
    route("card04_civil_servant", "card09_mercenary"),
    route("card05_ramen", "card08_business_owner"),
    route("card06_boxer", "card09_mercenary"),
    route("card07_surgeon", "card11_demon_king"),
    route("card08_business_owner", "card12_hero"),
];

static SHOICHI_CARDS: [CardDef; CARDS_PER_CHARACTER] = [
    card("card01_fish", "Fish"),
    card("card02_train", "Train driver"),
    card("card03_host", "Host"),
    card("card04_rehire", "Rehired veteran"),
    card("card05_bear", "Bear"),
    card("card06_ikemen", "Heartthrob"),
    card("card07_beach_bar", "Beach bar owner"),
    card("card08_revenge_boss", "Boss of revenge"),
    card("card09_youth_love", "Second youth"),
    card("card10_happy_family", "Happy family"),
    card("card11_pilot", "Pilot"),
    card("card12_investor", "Investor"),
];

static SHOICHI_ROUTES: &[ReversalRoute] = &[
    route("card01_fish", "card05_bear"),
    route("card01_fish", "card07_beach_bar"),
    route("card02_train", "card06_ikemen"),
    route("card02_train", "card08_revenge_boss"),
    route("card03_host", "card09_youth_love"),
    route("card03_host", "card11_pilot"),
    route("card04_rehire", "card08_revenge_boss"),
    route("card05_bear", "card10_happy_family"),
    route("card06_ikemen", "card11_pilot"),
    route("card08_revenge_boss", "card12_investor"),
];

static TATUMI_CARDS: [CardDef; CARDS_PER_CHARACTER] = [
    card("card01_stone", "Stone"),
    card("card02_bug", "Bug"),
    card("card03_flower", "Flower"),
    card("card04_prison", "Prisoner"),
    card("card05_father", "Father"),
    card("card06_enma", "Apprentice Enma"),
    card("card07_detective", "Detective"),
    card("card08_buddha", "Buddha"),
    card("card09_martial", "Martial artist"),
    card("card10_actor", "Actor"),
    card("card11_dragon", "Dragon"),
    card("card12_enma_true", "True Enma"),
];

static TATUMI_ROUTES: &[ReversalRoute] = &[
    route("card01_stone", "card05_father"),
    route("card01_stone", "card08_buddha"),
    route("card02_bug", "card06_enma"),
    route("card02_bug", "card11_dragon"),
    route("card03_flower", "card08_buddha"),
    route("card03_flower", "card09_martial"),
    route("card04_prison", "card07_detective"),
    route("card04_prison", "card10_actor"),
    route("card06_enma", "card12_enma_true"),
    route("card09_martial", "card12_enma_true"),
];

static YAHEI_CARDS: [CardDef; CARDS_PER_CHARACTER] = [
    card("card01_dinosaur", "Dinosaur"),
    card("card02_convenience", "Convenience store clerk"),
    card("card03_sns", "Social media star"),
    card("card04_rojyu", "Senior councillor"),
    card("card05_astronaut", "Astronaut"),
    card("card06_noble", "Noble"),
    card("card07_sushi", "Sushi master"),
    card("card08_sumo", "Sumo champion"),
    card("card09_hollywood", "Hollywood star"),
    card("card10_shogun", "Shogun"),
    card("card11_president", "President"),
    card("card12_timetravel", "Time traveller"),
];

static YAHEI_ROUTES: &[ReversalRoute] = &[
    route("card01_dinosaur", "card05_astronaut"),
    route("card01_dinosaur", "card12_timetravel"),
    route("card02_convenience", "card07_sushi"),
    route("card02_convenience", "card09_hollywood"),
    route("card03_sns", "card09_hollywood"),
    route("card03_sns", "card11_president"),
    route("card04_rojyu", "card10_shogun"),
    route("card04_rojyu", "card12_timetravel"),
    route("card06_noble", "card11_president"),
    route("card08_sumo", "card12_timetravel"),
];

static REIKO_CARDS: [CardDef; CARDS_PER_CHARACTER] = [
    card("reiko_card01", "Stray cat"),
    card("reiko_card02", "Scarecrow"),
    card("reiko_card03", "Shunned witch"),
    card("reiko_card04", "Ordinary mother"),
    card("reiko_card05", "Edo teahouse proprietress"),
    card("reiko_card06", "Alien"),
    card("reiko_card07", "Nun"),
    card("reiko_card08", "Bakumatsu spy"),
    card("reiko_card09", "True fortune teller"),
    card("reiko_card10", "Queen"),
    card("reiko_card11", "Joan of Arc"),
    card("reiko_card12", "Gatekeeper of heaven"),
];

static REIKO_ROUTES: &[ReversalRoute] = &[
    route("reiko_card01", "reiko_card05"),
    route("reiko_card01", "reiko_card07"),
    route("reiko_card02", "reiko_card06"),
    route("reiko_card02", "reiko_card08"),
    route("reiko_card03", "reiko_card09"),
    route("reiko_card03", "reiko_card11"),
    route("reiko_card04", "reiko_card10"),
    route("reiko_card04", "reiko_card12"),
    route("reiko_card05", "reiko_card11"),
    route("reiko_card06", "reiko_card12"),
];
