use chrono::{
    DateTime,
    Utc,
};
use gacha_core::{
    CardId,
    Rarity,
};
use serde::{
    Deserialize,
    Serialize,
};

pub const DEFAULT_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: CardId,
    pub name: String,
    pub rarity: Rarity,
    #[serde(default)]
    pub star_level: Option<u8>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub max_supply: Option<u32>,
    #[serde(default)]
    pub current_supply: Option<u32>,
    #[serde(default)]
    pub is_loss_card: Option<bool>,
}

/// One owned copy. `id` is the inventory row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub id: String,
    pub card_id: CardId,
    pub serial_number: Option<u64>,
    pub obtained_at: DateTime<Utc>,
    #[serde(default, rename = "cards")]
    pub card: Option<CardSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    /// Newest first.
    #[serde(rename = "collection")]
    pub entries: Vec<CollectionEntry>,
    pub cards: Vec<CardSummary>,
    pub total_owned: u64,
    pub distinct_owned: u64,
    pub total_available: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CollectionEdgeEvent {
    Add {
        entry: CollectionEntry,
        #[serde(default)]
        total_owned_delta: i64,
        #[serde(default)]
        distinct_owned_delta: i64,
    },
    Remove {
        inventory_id: String,
        #[serde(default)]
        total_owned_delta: i64,
        #[serde(default)]
        distinct_owned_delta: i64,
    },
}

impl CollectionEdgeEvent {
    pub fn add(entry: CollectionEntry, distinct_owned_delta: i64) -> Self {
        Self::Add {
            entry,
            total_owned_delta: 1,
            distinct_owned_delta,
        }
    }

    pub fn remove(inventory_id: impl Into<String>, distinct_owned_delta: i64) -> Self {
        Self::Remove {
            inventory_id: inventory_id.into(),
            total_owned_delta: -1,
            distinct_owned_delta,
        }
    }

    pub fn deltas(&self) -> (i64, i64) {
        match self {
            Self::Add {
                total_owned_delta,
                distinct_owned_delta,
                ..
            }
            | Self::Remove {
                total_owned_delta,
                distinct_owned_delta,
                ..
            } => (*total_owned_delta, *distinct_owned_delta),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPage {
    pub total_owned: u64,
    pub distinct_owned: u64,
    pub total_available: u64,
    pub cards: Vec<CardSummary>,
    pub collection: Vec<CollectionEntry>,
    pub page: PageMeta,
}

impl CollectionSnapshot {
    pub fn empty(total_available: u64, now: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            cards: Vec::new(),
            total_owned: 0,
            distinct_owned: 0,
            total_available,
            updated_at: now,
        }
    }

    /// Applies one event. Counters are clamped so that `total_owned >= 0`
    /// and `0 <= distinct_owned <= total_available` hold afterwards.
    pub fn apply(&mut self, event: &CollectionEdgeEvent, now: DateTime<Utc>) {
        match event {
            CollectionEdgeEvent::Add { entry, .. } => {
                self.entries.retain(|existing| existing.id != entry.id);
                self.entries.insert(0, entry.clone());
                // stable, so the new entry stays ahead of equal timestamps
                self.entries
                    .sort_by(|a, b| b.obtained_at.cmp(&a.obtained_at));
            }
            CollectionEdgeEvent::Remove { inventory_id, .. } => {
                self.entries.retain(|existing| &existing.id != inventory_id);
            }
        }
        let (total_delta, distinct_delta) = event.deltas();
        self.total_owned = offset_clamped(self.total_owned, total_delta);
        self.distinct_owned =
            offset_clamped(self.distinct_owned, distinct_delta).min(self.total_available);
        self.updated_at = now;
    }

    /// Entries `[offset, offset + limit)`. A zero limit is treated as one.
    pub fn page(&self, limit: usize, offset: usize) -> CollectionPage {
        let limit = limit.max(1);
        let start = offset.min(self.entries.len());
        let end = start.saturating_add(limit).min(self.entries.len());
        let collection = self.entries[start..end].to_vec();
        let has_more = self.total_owned > (offset + collection.len()) as u64;
        CollectionPage {
            total_owned: self.total_owned,
            distinct_owned: self.distinct_owned,
            total_available: self.total_available,
            cards: self.cards.clone(),
            collection,
            page: PageMeta {
                limit,
                offset,
                has_more,
            },
        }
    }
}

fn offset_clamped(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}
