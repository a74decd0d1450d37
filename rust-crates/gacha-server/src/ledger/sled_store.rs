// Sled-backed ledger. Multi-row updates run as one transaction across trees.
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
use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use gacha_core::CardStock;
use serde::{
    Serialize,
    de::DeserializeOwned,
};
use sled::{
    Config,
    Db,
    Transactional,
    Tree,
    transaction::{
        ConflictableTransactionError,
        ConflictableTransactionResult,
        TransactionError,
        TransactionalTree,
    },
};
use std::path::Path;

#[derive(Clone)]
pub struct SledLedgerStore {
    db: Db,
    card_tree: Tree,
    session_tree: Tree,
    result_tree: Tree,
    serial_tree: Tree,
    inventory_tree: Tree,
    owned_tree: Tree,
}

impl SledLedgerStore {
    pub fn new(db: Db) -> anyhow::Result<Self> {
        let open = |name: &str| {
            db.open_tree(name)
                .with_context(|| format!("open {name} tree"))
        };
        Ok(Self {
            card_tree: open("cards")?,
            session_tree: open("multi_pull_sessions")?,
            result_tree: open("pending_results")?,
            serial_tree: open("card_serials")?,
            inventory_tree: open("card_inventory")?,
            owned_tree: open("owned_counts")?,
            db,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let config = Config::default().path(path);
        let db = config.open().context("open sled database")?;
        Self::new(db)
    }

    fn serialize_record<T: Serialize>(value: &T, label: &str) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(value).with_context(|| format!("serialize {label}"))
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().context("flush ledger")?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in tree.iter() {
            let (_, value) = item.context("iterate ledger tree")?;
            records.push(deserialize(value.as_ref())?);
        }
        Ok(records)
    }
}

impl LedgerStore for SledLedgerStore {
    fn cards(&self) -> Result<Vec<CardStock>> {
        Self::scan(&self.card_tree)
    }

    fn seed_cards(&self, cards: &[CardStock]) -> Result<usize> {
        let mut inserted = 0;
        for card in cards {
            let key = card.card_id.as_str().as_bytes();
            if self.card_tree.contains_key(key).context("read card")? {
                continue;
            }
            let bytes = Self::serialize_record(card, "card")?;
            self.card_tree.insert(key, bytes).context("seed card")?;
            inserted += 1;
        }
        self.flush()?;
        Ok(inserted)
    }

    fn put_session(&self, session: &MultiPullSession) -> Result<()> {
        let bytes = Self::serialize_record(session, "multi pull session")?;
        self.session_tree
            .insert(session.id.as_bytes(), bytes)
            .context("persist multi pull session")?;
        self.flush()
    }

    fn session(&self, id: &str) -> Result<Option<MultiPullSession>> {
        match self
            .session_tree
            .get(id.as_bytes())
            .context("read multi pull session")?
        {
            Some(value) => Ok(Some(deserialize(value.as_ref())?)),
            None => Ok(None),
        }
    }

    fn sessions_for(&self, user_id: &str) -> Result<Vec<MultiPullSession>> {
        let mut sessions: Vec<MultiPullSession> = Self::scan(&self.session_tree)?;
        sessions.retain(|session| session.user_id == user_id);
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }

    fn insert_results(&self, results: &[PendingResult]) -> Result<()> {
        let records = results
            .iter()
            .map(|result| {
                Self::serialize_record(result, "pending result").map(|bytes| (&result.id, bytes))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.result_tree
            .transaction(|tx| {
                for (id, bytes) in &records {
                    tx.insert(id.as_bytes(), bytes.as_slice())?;
                }
                Ok(())
            })
            .map_err(transaction_error)?;
        self.flush()
    }

    fn result(&self, id: &str) -> Result<Option<PendingResult>> {
        match self
            .result_tree
            .get(id.as_bytes())
            .context("read pending result")?
        {
            Some(value) => Ok(Some(deserialize(value.as_ref())?)),
            None => Ok(None),
        }
    }

    fn unawarded(&self) -> Result<Vec<PendingResult>> {
        let results: Vec<PendingResult> = Self::scan(&self.result_tree)?;
        Ok(results
            .into_iter()
            .filter(|result| !result.card_awarded)
            .collect())
    }

    fn award(
        &self,
        result_id: &str,
        inventory_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AwardOutcome> {
        let outcome = (
            &self.result_tree,
            &self.card_tree,
            &self.serial_tree,
            &self.inventory_tree,
            &self.owned_tree,
        )
            .transaction(|(results, cards, serials, inventory, owned)| {
                let Some(bytes) = results.get(result_id.as_bytes())? else {
                    return abort(Error::PendingNotFound(result_id.to_string()));
                };
                let mut result: PendingResult = decode(&bytes)?;
                if result.card_awarded {
                    return Ok(AwardOutcome::AlreadyAwarded(result));
                }
                let card_key = result.outcome.card_id.as_str().as_bytes().to_vec();
                let Some(bytes) = cards.get(&card_key)? else {
                    return abort(Error::UnknownCard(result.outcome.card_id.clone()));
                };
                let mut card: CardStock = decode(&bytes)?;

                let serial = read_counter(serials, &card_key)? + 1;
                serials.insert(card_key.as_slice(), serial.to_be_bytes().to_vec())?;
                let owned_slot = owned_key(&result.user_id, &card);
                let owned_before = read_counter(owned, owned_slot.as_bytes())?;
                owned.insert(owned_slot.as_bytes(), (owned_before + 1).to_be_bytes().to_vec())?;

                let row = apply_award(&mut result, &mut card, serial, inventory_id, now);
                inventory.insert(row.id.as_bytes(), encode(&row)?)?;
                cards.insert(card_key.as_slice(), encode(&card)?)?;
                results.insert(result.id.as_bytes(), encode(&result)?)?;
                Ok(AwardOutcome::Awarded {
                    result,
                    inventory: row,
                    card,
                    already_owned: owned_before > 0,
                })
            })
            .map_err(transaction_error)?;
        self.flush()?;
        Ok(outcome)
    }

    fn inventory_for(&self, user_id: &str) -> Result<Vec<InventoryRow>> {
        let rows: Vec<InventoryRow> = Self::scan(&self.inventory_tree)?;
        Ok(rows.into_iter().filter(|row| row.user_id == user_id).collect())
    }

    fn transfer(
        &self,
        inventory_id: &str,
        from_user_id: &str,
        to_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TransferOutcome> {
        let outcome = (&self.inventory_tree, &self.card_tree, &self.owned_tree)
            .transaction(|(inventory, cards, owned)| {
                let Some(bytes) = inventory.get(inventory_id.as_bytes())? else {
                    return abort(Error::InventoryNotFound(inventory_id.to_string()));
                };
                let mut row: InventoryRow = decode(&bytes)?;
                let Some(bytes) = cards.get(row.card_id.as_str().as_bytes())? else {
                    return abort(Error::UnknownCard(row.card_id.clone()));
                };
                let card: CardStock = decode(&bytes)?;
                if let Err(e) = check_transfer(&row, &card, from_user_id) {
                    return abort(e);
                }

                let sender_key = owned_key(from_user_id, &card);
                let receiver_key = owned_key(to_user_id, &card);
                let sender_before = read_counter(owned, sender_key.as_bytes())?;
                let receiver_before = read_counter(owned, receiver_key.as_bytes())?;
                owned.insert(
                    sender_key.as_bytes(),
                    sender_before.saturating_sub(1).to_be_bytes().to_vec(),
                )?;
                owned.insert(
                    receiver_key.as_bytes(),
                    (receiver_before + 1).to_be_bytes().to_vec(),
                )?;

                row.user_id = to_user_id.to_string();
                row.obtained_at = now;
                row.obtained_via = ObtainedVia::Transfer;
                inventory.insert(row.id.as_bytes(), encode(&row)?)?;

                let (sender_distinct_delta, receiver_distinct_delta) =
                    distinct_deltas(sender_before, receiver_before);
                Ok(TransferOutcome {
                    row,
                    card,
                    sender_distinct_delta,
                    receiver_distinct_delta,
                })
            })
            .map_err(transaction_error)?;
        self.flush()?;
        Ok(outcome)
    }
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes).context("deserialize stored record")?)
}

fn abort<T>(e: Error) -> ConflictableTransactionResult<T, Error> {
    Err(ConflictableTransactionError::Abort(e))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ConflictableTransactionResult<T, Error> {
    deserialize(bytes).or_else(abort)
}

fn encode<T: Serialize>(value: &T) -> ConflictableTransactionResult<Vec<u8>, Error> {
    serde_json::to_vec(value)
        .context("serialize ledger record")
        .map_err(|e| ConflictableTransactionError::Abort(Error::Internal(e)))
}

fn read_counter(
    tree: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<u64, Error> {
    match tree.get(key)? {
        None => Ok(0),
        Some(bytes) => match <[u8; 8]>::try_from(bytes.as_ref()) {
            Ok(raw) => Ok(u64::from_be_bytes(raw)),
            Err(_) => abort(Error::Internal(anyhow::anyhow!("corrupt counter record"))),
        },
    }
}

fn transaction_error(e: TransactionError<Error>) -> Error {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => {
            Error::Internal(anyhow::Error::new(e).context("ledger transaction"))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use gacha_core::{
        CardId,
        CharacterId,
        DrawOutcome,
        Rarity,
        pool::test_helpers::card,
    };
    use std::{
        sync::Arc,
        thread,
    };
    use tempdir::TempDir;

    fn pending(user: &str, card_id: &str) -> PendingResult {
        let outcome = DrawOutcome {
            is_loss: false,
            character_id: CharacterId::new("reiko"),
            card_id: CardId::new(card_id),
            rarity: Rarity::SR,
            star_rating: 5,
            is_reversal: false,
            reversal_from_card_id: None,
            reversal_from_rarity: None,
        };
        PendingResult::new("session", user, outcome, ObtainedVia::TenfoldGacha, Utc::now())
    }

    fn store(dir: &TempDir) -> SledLedgerStore {
        let store = SledLedgerStore::open(dir.path()).unwrap();
        store
            .seed_cards(&[card("reiko:a", "reiko", Rarity::SR)])
            .unwrap();
        store
    }

    #[test]
    fn award__concurrent_claims__single_winner() {
        // given
        let dir = TempDir::new("ledger-sled").unwrap();
        let store = Arc::new(store(&dir));
        let result = pending("user", "reiko:a");
        store.insert_results(std::slice::from_ref(&result)).unwrap();

        // when
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let id = result.id.clone();
                thread::spawn(move || store.award(&id, &format!("inv-{i}"), Utc::now()).unwrap())
            })
            .collect();
        let outcomes: Vec<AwardOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // then
        let winners = outcomes
            .iter()
            .filter(|o| matches!(o, AwardOutcome::Awarded { .. }))
            .count();
        assert_eq!(winners, 1);
        let stored = store.result(&result.id).unwrap().unwrap();
        assert_eq!(stored.serial_number, Some(1));
        assert_eq!(store.inventory_for("user").unwrap().len(), 1);
        assert_eq!(store.cards().unwrap()[0].current_supply, 1);
    }

    #[test]
    fn award__serials_increase_per_card_and_survive_reopen() {
        // given
        let dir = TempDir::new("ledger-sled").unwrap();
        let first = pending("a", "reiko:a");
        let second = pending("b", "reiko:a");
        {
            let store = store(&dir);
            store
                .insert_results(&[first.clone(), second.clone()])
                .unwrap();
            store.award(&first.id, "inv-1", Utc::now()).unwrap();
        }

        // when
        let store = SledLedgerStore::open(dir.path()).unwrap();
        let outcome = store.award(&second.id, "inv-2", Utc::now()).unwrap();

        // then
        let AwardOutcome::Awarded { inventory, .. } = outcome else {
            panic!("expected a fresh award");
        };
        assert_eq!(inventory.serial_number, 2);
        assert_eq!(store.seed_cards(&[card("reiko:a", "reiko", Rarity::SR)]).unwrap(), 0);
        assert_eq!(store.cards().unwrap()[0].current_supply, 2);
    }

    #[test]
    fn transfer__moves_row_and_counts() {
        // given
        let dir = TempDir::new("ledger-sled").unwrap();
        let store = store(&dir);
        let result = pending("alice", "reiko:a");
        store.insert_results(std::slice::from_ref(&result)).unwrap();
        store.award(&result.id, "inv-1", Utc::now()).unwrap();

        // when
        let outcome = store.transfer("inv-1", "alice", "bob", Utc::now()).unwrap();

        // then
        assert_eq!(outcome.sender_distinct_delta, -1);
        assert_eq!(outcome.receiver_distinct_delta, 1);
        assert!(store.inventory_for("alice").unwrap().is_empty());
        assert_eq!(store.inventory_for("bob").unwrap()[0].obtained_via, ObtainedVia::Transfer);
        assert!(matches!(
            store.transfer("inv-1", "alice", "carol", Utc::now()),
            Err(Error::NotSender(_))
        ));
    }

    #[test]
    fn session__round_trips() {
        let dir = TempDir::new("ledger-sled").unwrap();
        let store = store(&dir);
        let mut session = MultiPullSession::running("user", "session", 10, Utc::now());
        store.put_session(&session).unwrap();
        session.complete();
        store.put_session(&session).unwrap();

        assert_eq!(store.session(&session.id).unwrap(), Some(session.clone()));
        assert_eq!(store.sessions_for("user").unwrap(), vec![session]);
        assert!(store.sessions_for("someone").unwrap().is_empty());
    }
}
