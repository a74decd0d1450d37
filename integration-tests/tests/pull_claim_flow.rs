#![allow(non_snake_case)]

use collection_cache::{
    app::{
        actix_collection_api::ActixCollectionApi,
        actor::CollectionActors,
        in_memory_snapshot_storage::InMemorySnapshotStorage,
        request::ApiKey,
    },
    snapshot::CollectionPage,
};
use futures::future::join_all;
use gacha_config::{
    StaticConfigProvider,
    default_config,
};
use gacha_core::{
    AssetPaths,
    presentation::Playback,
    roster::catalog,
};
use gacha_server::{
    api::{
        ActixGachaApi,
        COLLECTION_SOURCE_HEADER,
    },
    cache_client::CollectionCacheClient,
    emitter::HttpCollectionEmitter,
    ledger::{
        ClaimReceipt,
        LedgerStore,
        PullLedger,
        in_memory::InMemoryLedgerStore,
    },
    orchestrator::{
        BatchPull,
        Orchestrator,
        Pull,
    },
};
use serde_json::json;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::runtime::Handle;

const CACHE_KEY: &str = "cache-key";
const GACHA_KEY: &str = "gacha-key";

struct Services {
    // dropped in field order: the gacha API goes first
    gacha: ActixGachaApi,
    _cache: ActixCollectionApi,
    cache_client: CollectionCacheClient,
    http: reqwest::Client,
}

impl Services {
    fn start() -> Self {
        let actors = CollectionActors::new(InMemorySnapshotStorage::new(), Handle::current());
        let cache = ActixCollectionApi::new("127.0.0.1", None, ApiKey::new(CACHE_KEY), actors)
            .unwrap();
        let cache_client = CollectionCacheClient::new(cache.base_url(), CACHE_KEY).unwrap();

        let store = InMemoryLedgerStore::new();
        store.seed_cards(&catalog()).unwrap();
        let (emitter, _dispatcher) =
            HttpCollectionEmitter::spawn(cache_client.clone(), &Handle::current());
        let ledger = PullLedger::new(store, Arc::new(emitter));
        let mut config = default_config();
        config.loss_rate_percent = 0.0;
        let orchestrator = Orchestrator::new(
            ledger,
            Arc::new(StaticConfigProvider::new(config)),
            AssetPaths::default(),
        );
        let gacha = ActixGachaApi::new(
            "127.0.0.1",
            None,
            ApiKey::new(GACHA_KEY),
            orchestrator,
            Some(cache_client.clone()),
        )
        .unwrap();

        Self {
            gacha,
            _cache: cache,
            cache_client,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.http
            .post(format!("{}{path}", self.gacha.base_url()))
            .bearer_auth(GACHA_KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn collection(&self, user_id: &str) -> reqwest::Response {
        self.http
            .get(format!(
                "{}/gacha/collection?userId={user_id}",
                self.gacha.base_url()
            ))
            .bearer_auth(GACHA_KEY)
            .send()
            .await
            .unwrap()
    }

    /// Polls the cache until `accept` holds for the user's page.
    async fn wait_for_cache<F>(&self, user_id: &str, accept: F) -> CollectionPage
    where
        F: Fn(&CollectionPage) -> bool,
    {
        for _ in 0..200 {
            if let Some(page) = self.cache_client.page(user_id, 50, 0).await.unwrap() {
                if accept(&page) {
                    return page;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("collection cache for {user_id} never reached the expected state");
    }

    /// A cold read rebuilds from the ledger and hydrates the cache behind it.
    async fn hydrate(&self, user_id: &str) {
        let response = self.collection(user_id).await;
        assert_eq!(response.headers()[COLLECTION_SOURCE_HEADER], "store");
        self.wait_for_cache(user_id, |_| true).await;
    }
}

#[tokio::test]
async fn pull_batch__concurrent_skip_all_claims__single_award_each_and_cache_follows() {
    // given
    let services = Services::start();
    services.hydrate("u1").await;
    let batch: BatchPull = services
        .post(
            "/gacha/pull-batch?count=10",
            json!({ "userId": "u1", "sessionId": "s1" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(batch.pulls.len(), 10);

    // when
    for pull in &batch.pulls {
        let mut playback = Playback::new(&pull.presentation);
        assert!(playback.skip_all());
    }
    let claims = batch.pulls.iter().flat_map(|pull| {
        (0..3).map(|_| {
            services.post(
                "/gacha/claim",
                json!({ "resultId": pull.result_id, "userId": "u1" }),
            )
        })
    });
    let mut receipts: Vec<ClaimReceipt> = Vec::new();
    for response in join_all(claims).await {
        assert!(response.status().is_success());
        receipts.push(response.json().await.unwrap());
    }

    // then
    for pull in &batch.pulls {
        let for_pull: Vec<&ClaimReceipt> = receipts
            .iter()
            .filter(|r| r.result_id == pull.result_id)
            .collect();
        assert_eq!(for_pull.len(), 3);
        assert_eq!(for_pull.iter().filter(|r| !r.already_awarded).count(), 1);
        assert!(for_pull.iter().all(|r| r.serial_number == for_pull[0].serial_number));
    }
    let page = services.wait_for_cache("u1", |page| page.total_owned == 10).await;
    let distinct: std::collections::HashSet<_> =
        batch.pulls.iter().map(|p| p.outcome.card_id.clone()).collect();
    assert_eq!(page.distinct_owned, distinct.len() as u64);

    let response = services.collection("u1").await;
    assert_eq!(response.headers()[COLLECTION_SOURCE_HEADER], "edge");
    let served: CollectionPage = response.json().await.unwrap();
    assert_eq!(served.total_owned, 10);
}

#[tokio::test]
async fn transfer__moves_card_between_cached_collections() {
    // given
    let services = Services::start();
    services.hydrate("alice").await;
    services.hydrate("bob").await;
    let pull: Pull = services
        .post("/gacha/pull", json!({ "userId": "alice", "sessionId": "s1" }))
        .await
        .json()
        .await
        .unwrap();
    let mut playback = Playback::new(&pull.presentation);
    let reached_reveal = (0..pull.presentation.phases.len()).any(|_| playback.advance());
    assert!(reached_reveal);
    let receipt: ClaimReceipt = services
        .post("/gacha/claim", json!({ "resultId": pull.result_id }))
        .await
        .json()
        .await
        .unwrap();
    services
        .wait_for_cache("alice", |page| page.total_owned == 1)
        .await;
    let inventory_id = receipt.inventory_id.unwrap();

    // when
    let response = services
        .post(
            "/collection/transfer",
            json!({ "fromUserId": "alice", "toUserId": "bob", "inventoryId": inventory_id }),
        )
        .await;

    // then
    assert!(response.status().is_success());
    let alice = services
        .wait_for_cache("alice", |page| page.total_owned == 0)
        .await;
    assert_eq!(alice.distinct_owned, 0);
    let bob = services
        .wait_for_cache("bob", |page| page.total_owned == 1)
        .await;
    assert_eq!(bob.distinct_owned, 1);
    assert_eq!(bob.collection[0].id, inventory_id);

    let replay = services
        .post(
            "/collection/transfer",
            json!({ "fromUserId": "alice", "toUserId": "bob", "inventoryId": inventory_id }),
        )
        .await;
    assert_eq!(replay.status(), reqwest::StatusCode::FORBIDDEN);
}
