use crate::{
    Error,
    Result,
    ledger::{
        InventoryRow,
        MultiPullSession,
        ObtainedVia,
        PendingResult,
        store::{
            AwardOutcome,
            LedgerStore,
            TransferOutcome,
            apply_award,
            check_transfer,
            distinct_deltas,
            owned_key,
        },
    },
};
use anyhow::anyhow;
use chrono::{
    DateTime,
    Utc,
};
use gacha_core::{
    CardId,
    CardStock,
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};

#[derive(Default)]
struct State {
    cards: Vec<CardStock>,
    sessions: HashMap<String, MultiPullSession>,
    results: HashMap<String, PendingResult>,
    serials: HashMap<CardId, u64>,
    inventory: BTreeMap<String, InventoryRow>,
    owned: HashMap<String, u64>,
}

/// Everything behind one lock, so each operation is trivially atomic.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal(anyhow!("ledger state poisoned")))
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn cards(&self) -> Result<Vec<CardStock>> {
        Ok(self.state()?.cards.clone())
    }

    fn seed_cards(&self, cards: &[CardStock]) -> Result<usize> {
        let mut state = self.state()?;
        let mut inserted = 0;
        for card in cards {
            if !state.cards.iter().any(|c| c.card_id == card.card_id) {
                state.cards.push(card.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn put_session(&self, session: &MultiPullSession) -> Result<()> {
        self.state()?
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn session(&self, id: &str) -> Result<Option<MultiPullSession>> {
        Ok(self.state()?.sessions.get(id).cloned())
    }

    fn sessions_for(&self, user_id: &str) -> Result<Vec<MultiPullSession>> {
        let mut sessions: Vec<MultiPullSession> = self
            .state()?
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }

    fn insert_results(&self, results: &[PendingResult]) -> Result<()> {
        let mut state = self.state()?;
        for result in results {
            state.results.insert(result.id.clone(), result.clone());
        }
        Ok(())
    }

    fn result(&self, id: &str) -> Result<Option<PendingResult>> {
        Ok(self.state()?.results.get(id).cloned())
    }

    fn unawarded(&self) -> Result<Vec<PendingResult>> {
        Ok(self
            .state()?
            .results
            .values()
            .filter(|result| !result.card_awarded)
            .cloned()
            .collect())
    }

    fn award(
        &self,
        result_id: &str,
        inventory_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AwardOutcome> {
        let mut guard = self.state()?;
        let state = &mut *guard;
        let result = state
            .results
            .get_mut(result_id)
            .ok_or_else(|| Error::PendingNotFound(result_id.to_string()))?;
        if result.card_awarded {
            return Ok(AwardOutcome::AlreadyAwarded(result.clone()));
        }
        let card_id = &result.outcome.card_id;
        let card = state
            .cards
            .iter_mut()
            .find(|card| &card.card_id == card_id)
            .ok_or_else(|| Error::UnknownCard(card_id.clone()))?;

        let serial = state.serials.entry(card.card_id.clone()).or_insert(0);
        *serial += 1;
        let owned = state
            .owned
            .entry(owned_key(&result.user_id, card))
            .or_insert(0);
        let already_owned = *owned > 0;
        *owned += 1;

        let inventory = apply_award(result, card, *serial, inventory_id, now);
        state.inventory.insert(inventory.id.clone(), inventory.clone());
        Ok(AwardOutcome::Awarded {
            result: result.clone(),
            inventory,
            card: card.clone(),
            already_owned,
        })
    }

    fn inventory_for(&self, user_id: &str) -> Result<Vec<InventoryRow>> {
        Ok(self
            .state()?
            .inventory
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }

    fn transfer(
        &self,
        inventory_id: &str,
        from_user_id: &str,
        to_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TransferOutcome> {
        let mut guard = self.state()?;
        let state = &mut *guard;
        let row = state
            .inventory
            .get_mut(inventory_id)
            .ok_or_else(|| Error::InventoryNotFound(inventory_id.to_string()))?;
        let card = state
            .cards
            .iter()
            .find(|card| card.card_id == row.card_id)
            .ok_or_else(|| Error::UnknownCard(row.card_id.clone()))?;
        check_transfer(row, card, from_user_id)?;

        let sender_key = owned_key(from_user_id, card);
        let receiver_key = owned_key(to_user_id, card);
        let sender_before = state.owned.get(&sender_key).copied().unwrap_or(0);
        let receiver_before = state.owned.get(&receiver_key).copied().unwrap_or(0);
        state
            .owned
            .insert(sender_key, sender_before.saturating_sub(1));
        state.owned.insert(receiver_key, receiver_before + 1);

        row.user_id = to_user_id.to_string();
        row.obtained_at = now;
        row.obtained_via = ObtainedVia::Transfer;
        let (sender_distinct_delta, receiver_distinct_delta) =
            distinct_deltas(sender_before, receiver_before);
        Ok(TransferOutcome {
            row: row.clone(),
            card: card.clone(),
            sender_distinct_delta,
            receiver_distinct_delta,
        })
    }
}
