//! Authoritative record of draws. A pending result moves to awarded exactly
//! once, through the store's `award` transaction, whether a client claims it
//! or the stale sweep does.
use crate::{
    Error,
    Result,
    emitter::CollectionEmitter,
    new_id,
};
use chrono::{
    DateTime,
    Duration,
    Utc,
};
use collection_cache::snapshot::{
    CardSummary,
    CollectionEdgeEvent,
    CollectionEntry,
    CollectionSnapshot,
};
use gacha_core::{
    CardId,
    CardStock,
    DrawOutcome,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::{
        BTreeMap,
        HashSet,
    },
    sync::Arc,
};

pub mod in_memory;
pub mod sled_store;
pub mod store;

pub use store::{
    AwardOutcome,
    LedgerStore,
    TransferOutcome,
};

pub const STALE_AFTER_HOURS: i64 = 24;
pub const SWEEP_BATCH_LIMIT: usize = 100;
pub const PENDING_LOOKUP_LIMIT: usize = 10;
pub const SUSPICIOUS_PENDING_COUNT: usize = 10;
pub const SUSPICIOUS_WINDOW_DAYS: i64 = 7;
const OVERDUE_ITEMS_LIMIT: usize = 10;
const OVERDUE_ITEMS_LIMIT_FOR_USER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObtainedVia {
    SingleGacha,
    TenfoldGacha,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResult {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub multi_session_id: Option<String>,
    pub outcome: DrawOutcome,
    pub obtained_via: ObtainedVia,
    pub card_awarded: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub serial_number: Option<u64>,
    #[serde(default)]
    pub inventory_id: Option<String>,
}

impl PendingResult {
    pub fn new(
        session_id: &str,
        user_id: &str,
        outcome: DrawOutcome,
        obtained_via: ObtainedVia,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            multi_session_id: None,
            outcome,
            obtained_via,
            card_awarded: false,
            created_at,
            completed_at: None,
            serial_number: None,
            inventory_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiPullSession {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub total_pulls: u32,
    pub pulls_completed: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MultiPullSession {
    pub fn running(user_id: &str, session_id: &str, total_pulls: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            total_pulls,
            pulls_completed: 0,
            status: SessionStatus::Running,
            created_at: now,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.pulls_completed = self.total_pulls;
        self.status = SessionStatus::Completed;
    }

    /// `pulls_completed` is left as it was.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.error = Some(reason.into());
    }
}

/// One owned copy of a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRow {
    pub id: String,
    pub user_id: String,
    pub card_id: CardId,
    pub serial_number: u64,
    pub obtained_at: DateTime<Utc>,
    pub obtained_via: ObtainedVia,
    #[serde(default)]
    pub result_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub result_id: String,
    pub card_id: CardId,
    pub serial_number: Option<u64>,
    pub inventory_id: Option<String>,
    pub already_awarded: bool,
    pub is_loss: bool,
}

impl ClaimReceipt {
    fn from_result(result: &PendingResult, already_awarded: bool) -> Self {
        Self {
            result_id: result.id.clone(),
            card_id: result.outcome.card_id.clone(),
            serial_number: result.serial_number,
            inventory_id: result.inventory_id.clone(),
            already_awarded,
            is_loss: result.outcome.is_loss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub total: usize,
    pub awarded: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cutoff: DateTime<Utc>,
    /// Receipts of the results this sweep awarded.
    pub claimed: Vec<ClaimReceipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueItem {
    pub result_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub hours_ago: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousUser {
    pub user_id: String,
    pub pending_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub total_pending: usize,
    pub overdue_count: usize,
    pub overdue_items: Vec<OverdueItem>,
    pub suspicious: Vec<SuspiciousUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub inventory_id: String,
    pub card_id: CardId,
    pub from_user_id: String,
    pub to_user_id: String,
}

pub fn card_summary(card: &CardStock) -> CardSummary {
    CardSummary {
        id: card.card_id.clone(),
        name: card.name.clone(),
        rarity: card.rarity,
        star_level: Some(card.star_rating),
        description: card.title.clone(),
        image_url: card.image_path.clone(),
        max_supply: card.max_supply,
        current_supply: Some(card.current_supply),
        is_loss_card: Some(card.loss_card),
    }
}

pub fn collection_entry(row: &InventoryRow, card: Option<&CardStock>) -> CollectionEntry {
    CollectionEntry {
        id: row.id.clone(),
        card_id: row.card_id.clone(),
        serial_number: Some(row.serial_number),
        obtained_at: row.obtained_at,
        card: card.map(card_summary),
    }
}

#[derive(Clone)]
pub struct PullLedger<S> {
    store: S,
    emitter: Arc<dyn CollectionEmitter>,
}

impl<S: LedgerStore> PullLedger<S> {
    pub fn new(store: S, emitter: Arc<dyn CollectionEmitter>) -> Self {
        Self { store, emitter }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn create_pending(
        &self,
        session_id: &str,
        user_id: &str,
        outcome: DrawOutcome,
        obtained_via: ObtainedVia,
    ) -> Result<PendingResult> {
        let result = PendingResult::new(session_id, user_id, outcome, obtained_via, Utc::now());
        self.store.insert_results(std::slice::from_ref(&result))?;
        Ok(result)
    }

    /// Persists a whole batch; either every result lands or none does.
    pub fn record_batch(&self, results: &[PendingResult]) -> Result<()> {
        self.store.insert_results(results)
    }

    /// Idempotent. Only the call that flips the result to awarded assigns a
    /// serial and emits; every later call gets the same serial back.
    pub fn claim(&self, result_id: &str) -> Result<ClaimReceipt> {
        match self.store.award(result_id, &new_id(), Utc::now())? {
            AwardOutcome::AlreadyAwarded(result) => {
                tracing::debug!("result {result_id} already awarded");
                Ok(ClaimReceipt::from_result(&result, true))
            }
            AwardOutcome::Awarded {
                result,
                inventory,
                card,
                already_owned,
            } => {
                tracing::info!(
                    "awarded {} #{} to {} (result {})",
                    inventory.card_id,
                    inventory.serial_number,
                    inventory.user_id,
                    result.id
                );
                if !result.outcome.is_loss && !card.loss_card {
                    let distinct = if already_owned { 0 } else { 1 };
                    let entry = collection_entry(&inventory, Some(&card));
                    self.emitter
                        .emit(&result.user_id, CollectionEdgeEvent::add(entry, distinct));
                }
                Ok(ClaimReceipt::from_result(&result, false))
            }
        }
    }

    /// Like `claim`, but refuses results that belong to someone else.
    pub fn claim_as(&self, result_id: &str, user_id: &str) -> Result<ClaimReceipt> {
        let result = self
            .store
            .result(result_id)?
            .ok_or_else(|| Error::PendingNotFound(result_id.to_string()))?;
        if result.user_id != user_id {
            return Err(Error::NotOwner(result_id.to_string()));
        }
        self.claim(result_id)
    }

    /// Awards up to `SWEEP_BATCH_LIMIT` results left pending for longer than
    /// `STALE_AFTER_HOURS`, oldest first.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - Duration::hours(STALE_AFTER_HOURS);
        let mut stale: Vec<PendingResult> = self
            .store
            .unawarded()?
            .into_iter()
            .filter(|result| result.created_at < cutoff)
            .collect();
        stale.sort_by_key(|result| result.created_at);
        stale.truncate(SWEEP_BATCH_LIMIT);

        let mut report = SweepReport {
            total: stale.len(),
            awarded: 0,
            skipped: 0,
            errors: 0,
            cutoff,
            claimed: Vec::new(),
        };
        for result in &stale {
            match self.claim(&result.id) {
                Ok(receipt) if receipt.already_awarded => report.skipped += 1,
                Ok(receipt) => {
                    report.awarded += 1;
                    report.claimed.push(receipt);
                }
                Err(e) => {
                    tracing::warn!("sweep failed to award {}: {e}", result.id);
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// Unclaimed results of `session_id` from the last day, oldest first.
    pub fn pending_for(
        &self,
        user_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingResult>> {
        let since = now - Duration::hours(STALE_AFTER_HOURS);
        let mut pending: Vec<PendingResult> = self
            .store
            .unawarded()?
            .into_iter()
            .filter(|result| {
                result.user_id == user_id
                    && result.session_id == session_id
                    && result.created_at >= since
            })
            .collect();
        pending.sort_by_key(|result| result.created_at);
        pending.truncate(PENDING_LOOKUP_LIMIT);
        Ok(pending)
    }

    pub fn pending_summary(
        &self,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PendingSummary> {
        let unawarded = self.store.unawarded()?;
        let cutoff = now - Duration::hours(STALE_AFTER_HOURS);
        let window_start = now - Duration::days(SUSPICIOUS_WINDOW_DAYS);

        let for_user = |result: &&PendingResult| user_id.is_none_or(|user| result.user_id == user);
        let total_pending = unawarded.iter().filter(for_user).count();

        let mut overdue: Vec<&PendingResult> = unawarded
            .iter()
            .filter(for_user)
            .filter(|result| result.created_at < cutoff)
            .collect();
        overdue.sort_by_key(|result| result.created_at);
        let overdue_count = overdue.len();
        let overdue_limit = if user_id.is_some() {
            OVERDUE_ITEMS_LIMIT_FOR_USER
        } else {
            OVERDUE_ITEMS_LIMIT
        };
        let overdue_items = overdue
            .into_iter()
            .take(overdue_limit)
            .map(|result| OverdueItem {
                result_id: result.id.clone(),
                user_id: result.user_id.clone(),
                created_at: result.created_at,
                hours_ago: (now - result.created_at).num_hours(),
            })
            .collect();

        let mut per_user: BTreeMap<&str, usize> = BTreeMap::new();
        for result in unawarded.iter().filter(|r| r.created_at >= window_start) {
            *per_user.entry(result.user_id.as_str()).or_default() += 1;
        }
        let mut suspicious: Vec<SuspiciousUser> = per_user
            .into_iter()
            .filter(|(_, count)| *count >= SUSPICIOUS_PENDING_COUNT)
            .map(|(user, count)| SuspiciousUser {
                user_id: user.to_string(),
                pending_count: count,
            })
            .collect();
        suspicious.sort_by(|a, b| b.pending_count.cmp(&a.pending_count));

        Ok(PendingSummary {
            total_pending,
            overdue_count,
            overdue_items,
            suspicious,
        })
    }

    /// Moves one owned copy between users and tells the cache about both
    /// sides.
    pub fn transfer(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        inventory_id: &str,
    ) -> Result<TransferReceipt> {
        if from_user_id == to_user_id {
            return Err(Error::Invalid("cannot transfer a card to yourself".to_string()));
        }
        let TransferOutcome {
            row,
            card,
            sender_distinct_delta,
            receiver_distinct_delta,
        } = self
            .store
            .transfer(inventory_id, from_user_id, to_user_id, Utc::now())?;

        tracing::info!(
            "transferred {} ({}) from {from_user_id} to {to_user_id}",
            row.id,
            row.card_id
        );
        self.emitter.emit(
            from_user_id,
            CollectionEdgeEvent::remove(row.id.clone(), sender_distinct_delta),
        );
        self.emitter.emit(
            to_user_id,
            CollectionEdgeEvent::add(collection_entry(&row, Some(&card)), receiver_distinct_delta),
        );
        Ok(TransferReceipt {
            inventory_id: row.id,
            card_id: row.card_id,
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
        })
    }

    /// The user's collection rebuilt from owned rows, for hydrating the cache.
    /// Loss cards are never part of a collection.
    pub fn collection_snapshot(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CollectionSnapshot> {
        let cards: BTreeMap<CardId, CardStock> = self
            .store
            .cards()?
            .into_iter()
            .filter(|card| !card.loss_card)
            .map(|card| (card.card_id.clone(), card))
            .collect();

        let mut entries: Vec<CollectionEntry> = self
            .store
            .inventory_for(user_id)?
            .iter()
            .filter_map(|row| {
                cards
                    .get(&row.card_id)
                    .map(|card| collection_entry(row, Some(card)))
            })
            .collect();
        entries.sort_by(|a, b| b.obtained_at.cmp(&a.obtained_at));

        let distinct: HashSet<&CardId> = entries.iter().map(|entry| &entry.card_id).collect();
        let distinct_owned = distinct.len() as u64;
        Ok(CollectionSnapshot {
            total_owned: entries.len() as u64,
            distinct_owned,
            total_available: cards.len() as u64,
            cards: cards.values().map(card_summary).collect(),
            entries,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        emitter::RecordingEmitter,
        ledger::in_memory::InMemoryLedgerStore,
    };
    use gacha_core::{
        CharacterId,
        Rarity,
        pool::test_helpers::{
            card,
            loss_card,
        },
    };

    fn win(card_id: &str) -> DrawOutcome {
        DrawOutcome {
            is_loss: false,
            character_id: CharacterId::new("kenta"),
            card_id: CardId::new(card_id),
            rarity: Rarity::N,
            star_rating: 1,
            is_reversal: false,
            reversal_from_card_id: None,
            reversal_from_rarity: None,
        }
    }

    fn loss() -> DrawOutcome {
        DrawOutcome {
            is_loss: true,
            ..win("kenta:loss")
        }
    }

    fn ledger() -> (PullLedger<InMemoryLedgerStore>, RecordingEmitter) {
        let store = InMemoryLedgerStore::new();
        store
            .seed_cards(&[
                card("kenta:a", "kenta", Rarity::N),
                card("kenta:b", "kenta", Rarity::R),
                loss_card("kenta:loss", "kenta"),
            ])
            .unwrap();
        let emitter = RecordingEmitter::default();
        (PullLedger::new(store, Arc::new(emitter.clone())), emitter)
    }

    fn pending_at(
        ledger: &PullLedger<InMemoryLedgerStore>,
        user: &str,
        outcome: DrawOutcome,
        created_at: DateTime<Utc>,
    ) -> PendingResult {
        let result =
            PendingResult::new("session", user, outcome, ObtainedVia::SingleGacha, created_at);
        ledger.record_batch(std::slice::from_ref(&result)).unwrap();
        result
    }

    #[test]
    fn claim__first_call__assigns_serial_and_emits_add() {
        // given
        let (sut, emitter) = ledger();
        let pending = sut
            .create_pending("session", "user", win("kenta:a"), ObtainedVia::SingleGacha)
            .unwrap();

        // when
        let receipt = sut.claim(&pending.id).unwrap();

        // then
        assert_eq!(receipt.serial_number, Some(1));
        assert!(!receipt.already_awarded);
        let events = emitter.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "user");
        assert_eq!(events[0].1.deltas(), (1, 1));
    }

    #[test]
    fn claim__repeated__returns_same_serial_without_second_event() {
        // given
        let (sut, emitter) = ledger();
        let pending = sut
            .create_pending("session", "user", win("kenta:a"), ObtainedVia::SingleGacha)
            .unwrap();
        let first = sut.claim(&pending.id).unwrap();

        // when
        let second = sut.claim(&pending.id).unwrap();

        // then
        assert!(second.already_awarded);
        assert_eq!(second.serial_number, first.serial_number);
        assert_eq!(second.inventory_id, first.inventory_id);
        assert_eq!(emitter.events().len(), 1);
    }

    #[test]
    fn claim__second_copy__emits_zero_distinct_delta() {
        // given
        let (sut, emitter) = ledger();
        let first = sut
            .create_pending("session", "user", win("kenta:a"), ObtainedVia::SingleGacha)
            .unwrap();
        let second = sut
            .create_pending("session", "user", win("kenta:a"), ObtainedVia::SingleGacha)
            .unwrap();
        sut.claim(&first.id).unwrap();

        // when
        let receipt = sut.claim(&second.id).unwrap();

        // then
        assert_eq!(receipt.serial_number, Some(2));
        assert_eq!(emitter.events()[1].1.deltas(), (1, 0));
        let card = sut
            .store()
            .cards()
            .unwrap()
            .into_iter()
            .find(|c| c.card_id.as_str() == "kenta:a")
            .unwrap();
        assert_eq!(card.current_supply, 2);
    }

    #[test]
    fn claim__loss__awards_without_event() {
        // given
        let (sut, emitter) = ledger();
        let pending = sut
            .create_pending("session", "user", loss(), ObtainedVia::SingleGacha)
            .unwrap();

        // when
        let receipt = sut.claim(&pending.id).unwrap();

        // then
        assert!(receipt.is_loss);
        assert!(receipt.serial_number.is_some());
        assert!(emitter.events().is_empty());
    }

    #[test]
    fn claim_as__other_user__is_refused() {
        // given
        let (sut, _) = ledger();
        let pending = sut
            .create_pending("session", "owner", win("kenta:a"), ObtainedVia::SingleGacha)
            .unwrap();

        // when
        let result = sut.claim_as(&pending.id, "intruder");

        // then
        assert!(matches!(result, Err(Error::NotOwner(_))));
        assert!(!sut.store().result(&pending.id).unwrap().unwrap().card_awarded);
    }

    #[test]
    fn claim__unknown_result__is_not_found() {
        let (sut, _) = ledger();

        assert!(matches!(sut.claim("missing"), Err(Error::PendingNotFound(_))));
    }

    #[test]
    fn sweep_stale__awards_only_results_past_cutoff() {
        // given
        let (sut, emitter) = ledger();
        let now = Utc::now();
        let stale = pending_at(&sut, "user", win("kenta:a"), now - Duration::hours(30));
        let fresh = pending_at(&sut, "user", win("kenta:b"), now - Duration::hours(1));

        // when
        let report = sut.sweep_stale(now).unwrap();

        // then
        assert_eq!(report.total, 1);
        assert_eq!(report.awarded, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.claimed.len(), 1);
        assert_eq!(report.claimed[0].result_id, stale.id);
        assert_eq!(report.claimed[0].serial_number, Some(1));
        let awarded = sut.store().result(&stale.id).unwrap().unwrap();
        assert!(awarded.card_awarded);
        assert_eq!(awarded.serial_number, Some(1));
        assert!(!sut.store().result(&fresh.id).unwrap().unwrap().card_awarded);
        assert_eq!(emitter.events().len(), 1);
    }

    #[test]
    fn pending_for__filters_session_and_age__oldest_first() {
        // given
        let (sut, _) = ledger();
        let now = Utc::now();
        let newer = pending_at(&sut, "user", win("kenta:a"), now - Duration::minutes(5));
        let older = pending_at(&sut, "user", win("kenta:b"), now - Duration::minutes(50));
        pending_at(&sut, "user", win("kenta:a"), now - Duration::hours(25));
        pending_at(&sut, "someone", win("kenta:a"), now - Duration::minutes(1));
        let claimed = pending_at(&sut, "user", win("kenta:a"), now - Duration::minutes(2));
        sut.claim(&claimed.id).unwrap();

        // when
        let pending = sut.pending_for("user", "session", now).unwrap();

        // then
        let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![older.id.as_str(), newer.id.as_str()]);
    }

    #[test]
    fn pending_summary__reports_overdue_and_suspicious_users() {
        // given
        let (sut, _) = ledger();
        let now = Utc::now();
        pending_at(&sut, "slow", win("kenta:a"), now - Duration::hours(48));
        for _ in 0..SUSPICIOUS_PENDING_COUNT {
            pending_at(&sut, "hoarder", win("kenta:b"), now - Duration::hours(2));
        }

        // when
        let summary = sut.pending_summary(None, now).unwrap();

        // then
        assert_eq!(summary.total_pending, SUSPICIOUS_PENDING_COUNT + 1);
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.overdue_items[0].user_id, "slow");
        assert_eq!(summary.overdue_items[0].hours_ago, 48);
        assert_eq!(
            summary.suspicious,
            vec![SuspiciousUser {
                user_id: "hoarder".to_string(),
                pending_count: SUSPICIOUS_PENDING_COUNT,
            }]
        );
    }

    #[test]
    fn transfer__last_copy__emits_remove_and_add_with_distinct_deltas() {
        // given
        let (sut, emitter) = ledger();
        let pending = sut
            .create_pending("session", "alice", win("kenta:a"), ObtainedVia::SingleGacha)
            .unwrap();
        let receipt = sut.claim(&pending.id).unwrap();
        let inventory_id = receipt.inventory_id.unwrap();

        // when
        sut.transfer("alice", "bob", &inventory_id).unwrap();

        // then
        let events = emitter.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].0, "alice");
        assert_eq!(
            events[1].1,
            CollectionEdgeEvent::remove(inventory_id.clone(), -1)
        );
        assert_eq!(events[2].0, "bob");
        assert_eq!(events[2].1.deltas(), (1, 1));
        let bob = sut.collection_snapshot("bob", Utc::now()).unwrap();
        assert_eq!(bob.total_owned, 1);
        assert_eq!(bob.entries[0].id, inventory_id);
        assert_eq!(sut.collection_snapshot("alice", Utc::now()).unwrap().total_owned, 0);
    }

    #[test]
    fn transfer__not_owned_by_sender__is_refused() {
        // given
        let (sut, _) = ledger();
        let pending = sut
            .create_pending("session", "alice", win("kenta:a"), ObtainedVia::SingleGacha)
            .unwrap();
        let inventory_id = sut.claim(&pending.id).unwrap().inventory_id.unwrap();

        // when
        let result = sut.transfer("mallory", "bob", &inventory_id);

        // then
        assert!(matches!(result, Err(Error::NotSender(_))));
    }

    #[test]
    fn collection_snapshot__excludes_loss_cards() {
        // given
        let (sut, _) = ledger();
        for outcome in [win("kenta:a"), win("kenta:a"), win("kenta:b"), loss()] {
            let pending = sut
                .create_pending("session", "user", outcome, ObtainedVia::TenfoldGacha)
                .unwrap();
            sut.claim(&pending.id).unwrap();
        }

        // when
        let snapshot = sut.collection_snapshot("user", Utc::now()).unwrap();

        // then
        assert_eq!(snapshot.total_owned, 3);
        assert_eq!(snapshot.distinct_owned, 2);
        assert_eq!(snapshot.total_available, 2);
        assert_eq!(snapshot.cards.len(), 2);
    }

    #[test]
    fn multi_pull_session__fail__keeps_pulls_completed() {
        let mut session = MultiPullSession::running("user", "session", 10, Utc::now());

        session.fail("store offline");

        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.pulls_completed, 0);
        assert_eq!(session.error.as_deref(), Some("store offline"));
    }
}
