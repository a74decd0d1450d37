//! Turns a pull request into persisted pending results plus the reveal plan
//! the client plays back. Losses are claimed on the spot.
use crate::{
    Error,
    Result,
    ledger::{
        ClaimReceipt,
        LedgerStore,
        MultiPullSession,
        ObtainedVia,
        PendingResult,
        PullLedger,
    },
};
use chrono::Utc;
use gacha_config::ProbabilityConfigProvider;
use gacha_core::{
    AssetPaths,
    CardPool,
    DrawOutcome,
    PresentationPlan,
    ProbabilityConfig,
    RollSource,
    resolve,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: u32 = 10;
pub const MAX_BATCH_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pull {
    pub order: u32,
    pub result_id: String,
    pub outcome: DrawOutcome,
    pub presentation: PresentationPlan,
    /// Set for losses, which are awarded before the response goes out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimReceipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPull {
    pub session: MultiPullSession,
    pub pulls: Vec<Pull>,
}

#[derive(Clone)]
pub struct Orchestrator<S> {
    ledger: PullLedger<S>,
    config: Arc<dyn ProbabilityConfigProvider>,
    assets: AssetPaths,
}

impl<S: LedgerStore> Orchestrator<S> {
    pub fn new(
        ledger: PullLedger<S>,
        config: Arc<dyn ProbabilityConfigProvider>,
        assets: AssetPaths,
    ) -> Self {
        Self {
            ledger,
            config,
            assets,
        }
    }

    pub fn ledger(&self) -> &PullLedger<S> {
        &self.ledger
    }

    /// Draws `count` results under one session row. The session ends
    /// `completed` only when every result is persisted; otherwise it is
    /// marked `error` and nothing from the batch is stored.
    pub fn run_batch<R>(
        &self,
        user_id: &str,
        session_id: &str,
        count: u32,
        rolls: &mut R,
    ) -> Result<BatchPull>
    where
        R: RollSource + ?Sized,
    {
        if count == 0 || count > MAX_BATCH_SIZE {
            return Err(Error::Invalid(format!(
                "count must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        let store = self.ledger.store();
        let mut session = MultiPullSession::running(user_id, session_id, count, Utc::now());
        store.put_session(&session)?;

        let recorded = self
            .draw(count, rolls)
            .map(|outcomes| {
                let now = Utc::now();
                outcomes
                    .into_iter()
                    .map(|outcome| {
                        let mut result = PendingResult::new(
                            session_id,
                            user_id,
                            outcome,
                            ObtainedVia::TenfoldGacha,
                            now,
                        );
                        result.multi_session_id = Some(session.id.clone());
                        result
                    })
                    .collect::<Vec<_>>()
            })
            .and_then(|results| self.ledger.record_batch(&results).map(|()| results));

        let results = match recorded {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("batch {} for {user_id} failed: {e}", session.id);
                session.fail(e.to_string());
                if let Err(store_err) = store.put_session(&session) {
                    tracing::warn!("failed to mark batch {} as error: {store_err}", session.id);
                }
                return Err(e);
            }
        };

        session.complete();
        store.put_session(&session)?;
        tracing::info!(
            "batch {} for {user_id}: {} pulls recorded",
            session.id,
            results.len()
        );

        let pulls = results
            .into_iter()
            .zip(1..)
            .map(|(result, order)| self.present(order, result, rolls))
            .collect();
        Ok(BatchPull { session, pulls })
    }

    /// One draw, no session row.
    pub fn pull_single<R>(&self, user_id: &str, session_id: &str, rolls: &mut R) -> Result<Pull>
    where
        R: RollSource + ?Sized,
    {
        let outcome = self
            .draw(1, rolls)?
            .pop()
            .ok_or_else(|| Error::Unavailable("draw produced no outcome".to_string()))?;
        let result =
            self.ledger
                .create_pending(session_id, user_id, outcome, ObtainedVia::SingleGacha)?;
        Ok(self.present(1, result, rolls))
    }

    fn current_config(&self) -> Result<ProbabilityConfig> {
        self.config
            .current()
            .map_err(|e| Error::Unavailable(format!("{e:#}")))
    }

    /// Each non-loss draw is counted against the pool before the next one,
    /// so a batch cannot oversell a card on its own.
    fn draw<R>(&self, count: u32, rolls: &mut R) -> Result<Vec<DrawOutcome>>
    where
        R: RollSource + ?Sized,
    {
        let config = self.current_config()?;
        let mut pool = CardPool::new(self.ledger.store().cards()?);
        let mut outcomes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let outcome = resolve(&config, &pool, rolls)?;
            if !outcome.is_loss {
                pool.reserve(&outcome.card_id);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn present<R>(&self, order: u32, result: PendingResult, rolls: &mut R) -> Pull
    where
        R: RollSource + ?Sized,
    {
        let presentation = PresentationPlan::for_outcome(&result.outcome, &self.assets, rolls);
        let claim = if result.outcome.is_loss {
            match self.ledger.claim(&result.id) {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    // left pending; the stale sweep picks it up
                    tracing::warn!("auto-claim of loss {} failed: {e}", result.id);
                    None
                }
            }
        } else {
            None
        };
        Pull {
            order,
            result_id: result.id,
            outcome: result.outcome,
            presentation,
            claim,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        emitter::RecordingEmitter,
        ledger::{
            AwardOutcome,
            InventoryRow,
            SessionStatus,
            TransferOutcome,
            in_memory::InMemoryLedgerStore,
        },
    };
    use chrono::DateTime;
    use gacha_config::{
        StaticConfigProvider,
        default_config,
    };
    use gacha_core::{
        CardStock,
        Character,
        roster::catalog,
        weighted::ScriptedRolls,
    };
    use rand::{
        SeedableRng,
        rngs::StdRng,
    };

    fn orchestrator_with(
        cards: Vec<CardStock>,
        config: ProbabilityConfig,
    ) -> (Orchestrator<InMemoryLedgerStore>, RecordingEmitter) {
        let store = InMemoryLedgerStore::new();
        store.seed_cards(&cards).unwrap();
        let emitter = RecordingEmitter::default();
        let ledger = PullLedger::new(store, Arc::new(emitter.clone()));
        let sut = Orchestrator::new(
            ledger,
            Arc::new(StaticConfigProvider::new(config)),
            AssetPaths::default(),
        );
        (sut, emitter)
    }

    #[test]
    fn run_batch__records_every_pull_and_completes_session() {
        // given
        let (sut, _) = orchestrator_with(catalog(), default_config());
        let mut rng = StdRng::seed_from_u64(7);

        // when
        let batch = sut.run_batch("user", "session", 10, &mut rng).unwrap();

        // then
        assert_eq!(batch.pulls.len(), 10);
        assert_eq!(batch.session.status, SessionStatus::Completed);
        assert_eq!(batch.session.pulls_completed, 10);
        let stored = sut.ledger().store().session(&batch.session.id).unwrap().unwrap();
        assert_eq!(stored, batch.session);
        for pull in &batch.pulls {
            let result = sut.ledger().store().result(&pull.result_id).unwrap().unwrap();
            assert_eq!(result.multi_session_id.as_deref(), Some(batch.session.id.as_str()));
            assert_eq!(result.card_awarded, pull.outcome.is_loss);
            assert_eq!(pull.claim.is_some(), pull.outcome.is_loss);
        }
    }

    #[test]
    fn run_batch__all_losses__auto_claimed_without_events() {
        // given
        let mut config = default_config();
        config.loss_rate_percent = 100.0;
        let (sut, emitter) = orchestrator_with(catalog(), config);
        let mut rng = StdRng::seed_from_u64(1);

        // when
        let batch = sut.run_batch("user", "session", 3, &mut rng).unwrap();

        // then
        assert!(batch.pulls.iter().all(|p| p.outcome.is_loss));
        assert!(sut.ledger().store().unawarded().unwrap().is_empty());
        assert!(emitter.events().is_empty());
    }

    #[test]
    fn run_batch__last_unit__not_drawn_twice_in_one_batch() {
        // given
        let mut cards: Vec<CardStock> = Character::Kenta.profile().stock();
        cards.truncate(2);
        cards[0].max_supply = Some(1);
        let mut config = default_config();
        config.loss_rate_percent = 0.0;
        config.characters.retain(|c| c.id == Character::Kenta.id());
        let (sut, _) = orchestrator_with(cards.clone(), config);
        let mut rng = StdRng::seed_from_u64(3);

        // when
        let batch = sut.run_batch("user", "session", 10, &mut rng).unwrap();

        // then
        let limited = batch
            .pulls
            .iter()
            .filter(|p| p.outcome.card_id == cards[0].card_id)
            .count();
        assert!(limited <= 1);
    }

    #[test]
    fn run_batch__no_playable_cards__marks_stored_session_error() {
        // given
        let (sut, _) = orchestrator_with(Vec::new(), default_config());
        // above the loss rate, so the draw needs a playable card
        let mut rolls = ScriptedRolls::new([0.99]);

        // when
        let result = sut.run_batch("user", "session", 10, &mut rolls);

        // then
        assert!(matches!(result, Err(Error::Unavailable(_))));
        assert!(sut.ledger().store().unawarded().unwrap().is_empty());
        let sessions = sut.ledger().store().sessions_for("user").unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Error);
        assert_eq!(sessions[0].pulls_completed, 0);
        assert!(sessions[0].error.is_some());
    }

    /// In-memory store whose batch inserts always fail.
    #[derive(Clone, Default)]
    struct RejectingInserts(InMemoryLedgerStore);

    impl LedgerStore for RejectingInserts {
        fn cards(&self) -> Result<Vec<CardStock>> {
            self.0.cards()
        }

        fn seed_cards(&self, cards: &[CardStock]) -> Result<usize> {
            self.0.seed_cards(cards)
        }

        fn put_session(&self, session: &MultiPullSession) -> Result<()> {
            self.0.put_session(session)
        }

        fn session(&self, id: &str) -> Result<Option<MultiPullSession>> {
            self.0.session(id)
        }

        fn sessions_for(&self, user_id: &str) -> Result<Vec<MultiPullSession>> {
            self.0.sessions_for(user_id)
        }

        fn insert_results(&self, _results: &[PendingResult]) -> Result<()> {
            Err(anyhow::anyhow!("store offline").into())
        }

        fn result(&self, id: &str) -> Result<Option<PendingResult>> {
            self.0.result(id)
        }

        fn unawarded(&self) -> Result<Vec<PendingResult>> {
            self.0.unawarded()
        }

        fn award(
            &self,
            result_id: &str,
            inventory_id: &str,
            now: DateTime<Utc>,
        ) -> Result<AwardOutcome> {
            self.0.award(result_id, inventory_id, now)
        }

        fn inventory_for(&self, user_id: &str) -> Result<Vec<InventoryRow>> {
            self.0.inventory_for(user_id)
        }

        fn transfer(
            &self,
            inventory_id: &str,
            from_user_id: &str,
            to_user_id: &str,
            now: DateTime<Utc>,
        ) -> Result<TransferOutcome> {
            self.0.transfer(inventory_id, from_user_id, to_user_id, now)
        }
    }

    #[test]
    fn run_batch__record_fails__session_error_and_nothing_pending() {
        // given
        let store = RejectingInserts::default();
        store.seed_cards(&catalog()).unwrap();
        let ledger = PullLedger::new(store.clone(), Arc::new(RecordingEmitter::default()));
        let sut = Orchestrator::new(
            ledger,
            Arc::new(StaticConfigProvider::new(default_config())),
            AssetPaths::default(),
        );
        let mut rng = StdRng::seed_from_u64(5);

        // when
        let result = sut.run_batch("user", "session", 10, &mut rng);

        // then
        assert!(matches!(result, Err(Error::Internal(_))));
        assert!(store.unawarded().unwrap().is_empty());
        let sessions = store.sessions_for("user").unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Error);
        assert_eq!(sessions[0].pulls_completed, 0);
        assert_eq!(sessions[0].error.as_deref(), Some("store offline"));
    }

    #[test]
    fn run_batch__out_of_range_count__is_invalid() {
        let (sut, _) = orchestrator_with(catalog(), default_config());
        let mut rng = StdRng::seed_from_u64(0);

        assert!(matches!(
            sut.run_batch("user", "session", 0, &mut rng),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            sut.run_batch("user", "session", MAX_BATCH_SIZE + 1, &mut rng),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn pull_single__win__stays_pending_with_presentation() {
        // given
        let mut config = default_config();
        config.loss_rate_percent = 0.0;
        let (sut, emitter) = orchestrator_with(catalog(), config);
        let mut rng = StdRng::seed_from_u64(11);

        // when
        let pull = sut.pull_single("user", "session", &mut rng).unwrap();

        // then
        assert!(!pull.outcome.is_loss);
        assert!(pull.claim.is_none());
        assert!(pull.presentation.phases.last().unwrap().is_reveal());
        let result = sut.ledger().store().result(&pull.result_id).unwrap().unwrap();
        assert_eq!(result.obtained_via, ObtainedVia::SingleGacha);
        assert!(result.multi_session_id.is_none());
        assert!(emitter.events().is_empty());
    }
}
