use crate::ledger::{
    LedgerStore,
    PullLedger,
};
use chrono::Utc;
use std::time::Duration;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
};

/// Runs `sweep_stale` every `every` until the returned task is aborted.
pub fn spawn_sweep<S: LedgerStore>(
    ledger: PullLedger<S>,
    every: Duration,
    runtime: &Handle,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let sweeper = ledger.clone();
            // blocking: every award flushes sled
            match tokio::task::spawn_blocking(move || sweeper.sweep_stale(Utc::now())).await {
                Ok(Ok(report)) if report.total > 0 => tracing::info!(
                    "stale sweep: {} awarded, {} skipped, {} errors",
                    report.awarded,
                    report.skipped,
                    report.errors
                ),
                Ok(Ok(_)) => tracing::debug!("stale sweep: nothing pending"),
                Ok(Err(e)) => tracing::warn!("stale sweep failed: {e}"),
                Err(e) => tracing::warn!("stale sweep task failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        emitter::NoopEmitter,
        ledger::{
            ObtainedVia,
            PendingResult,
            in_memory::InMemoryLedgerStore,
        },
    };
    use chrono::Duration as ChronoDuration;
    use gacha_core::{
        CardId,
        CharacterId,
        DrawOutcome,
        Rarity,
        pool::test_helpers::card,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn spawn_sweep__awards_stale_result_on_first_tick() {
        // given
        let store = InMemoryLedgerStore::new();
        store
            .seed_cards(&[card("yahei:a", "yahei", Rarity::UR)])
            .unwrap();
        let outcome = DrawOutcome {
            is_loss: false,
            character_id: CharacterId::new("yahei"),
            card_id: CardId::new("yahei:a"),
            rarity: Rarity::UR,
            star_rating: 9,
            is_reversal: false,
            reversal_from_card_id: None,
            reversal_from_rarity: None,
        };
        let stale = PendingResult::new(
            "session",
            "user",
            outcome,
            ObtainedVia::SingleGacha,
            Utc::now() - ChronoDuration::hours(25),
        );
        store.insert_results(std::slice::from_ref(&stale)).unwrap();
        let ledger = PullLedger::new(store.clone(), Arc::new(NoopEmitter));

        // when
        let task = spawn_sweep(ledger, Duration::from_secs(3600), &Handle::current());
        for _ in 0..100 {
            if store.unawarded().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        // then
        let awarded = store.result(&stale.id).unwrap().unwrap();
        assert!(awarded.card_awarded);
        assert_eq!(awarded.serial_number, Some(1));
        assert!(awarded.inventory_id.is_some());
    }
}
