use crate::{
    Error,
    Result,
    ledger::{
        InventoryRow,
        MultiPullSession,
        PendingResult,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use gacha_core::CardStock;

#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    /// This call performed the transition.
    Awarded {
        result: PendingResult,
        inventory: InventoryRow,
        card: CardStock,
        /// The user held another copy of the card before this award.
        already_owned: bool,
    },
    AlreadyAwarded(PendingResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub row: InventoryRow,
    pub card: CardStock,
    pub sender_distinct_delta: i64,
    pub receiver_distinct_delta: i64,
}

/// Authoritative storage behind the pull ledger. `award`, `transfer` and
/// `insert_results` are each a single transaction.
pub trait LedgerStore: Clone + Send + Sync + 'static {
    fn cards(&self) -> Result<Vec<CardStock>>;

    /// Inserts cards missing from the table. Existing rows keep their supply
    /// counters. Returns how many were inserted.
    fn seed_cards(&self, cards: &[CardStock]) -> Result<usize>;

    fn put_session(&self, session: &MultiPullSession) -> Result<()>;

    fn session(&self, id: &str) -> Result<Option<MultiPullSession>>;

    /// Batch sessions started by `user_id`, oldest first.
    fn sessions_for(&self, user_id: &str) -> Result<Vec<MultiPullSession>>;

    fn insert_results(&self, results: &[PendingResult]) -> Result<()>;

    fn result(&self, id: &str) -> Result<Option<PendingResult>>;

    fn unawarded(&self) -> Result<Vec<PendingResult>>;

    /// Flips the result to awarded if nobody has yet, assigning the card's
    /// next serial, bumping its supply and writing the inventory row.
    fn award(
        &self,
        result_id: &str,
        inventory_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AwardOutcome>;

    fn inventory_for(&self, user_id: &str) -> Result<Vec<InventoryRow>>;

    fn transfer(
        &self,
        inventory_id: &str,
        from_user_id: &str,
        to_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TransferOutcome>;
}

pub(crate) fn owned_key(user_id: &str, card: &CardStock) -> String {
    format!("{user_id}\u{0}{}", card.card_id)
}

/// The award transition itself, shared by every store. `serial` is the
/// card's next serial number.
pub(crate) fn apply_award(
    result: &mut PendingResult,
    card: &mut CardStock,
    serial: u64,
    inventory_id: &str,
    now: DateTime<Utc>,
) -> InventoryRow {
    if !card.has_supply() {
        tracing::warn!(
            "card {} awarded past its supply ({}/{:?})",
            card.card_id,
            card.current_supply,
            card.max_supply
        );
    }
    card.current_supply = card.current_supply.saturating_add(1);

    result.card_awarded = true;
    result.completed_at = Some(now);
    result.serial_number = Some(serial);
    result.inventory_id = Some(inventory_id.to_string());

    InventoryRow {
        id: inventory_id.to_string(),
        user_id: result.user_id.clone(),
        card_id: card.card_id.clone(),
        serial_number: serial,
        obtained_at: now,
        obtained_via: result.obtained_via,
        result_id: Some(result.id.clone()),
    }
}

pub(crate) fn check_transfer(
    row: &InventoryRow,
    card: &CardStock,
    from_user_id: &str,
) -> Result<()> {
    if row.user_id != from_user_id {
        return Err(Error::NotSender(row.id.clone()));
    }
    if card.loss_card {
        return Err(Error::Invalid("loss cards cannot be transferred".to_string()));
    }
    Ok(())
}

/// Distinct-owned deltas for the sender and receiver, given how many copies
/// each held before the move.
pub(crate) fn distinct_deltas(sender_before: u64, receiver_before: u64) -> (i64, i64) {
    let sender = if sender_before <= 1 { -1 } else { 0 };
    let receiver = if receiver_before == 0 { 1 } else { 0 };
    (sender, receiver)
}
