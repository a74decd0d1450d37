use crate::{
    Result,
    app::{
        actor::{
            Applied,
            CollectionActors,
        },
        request::{
            ApiKey,
            Authorized,
            LenientBody,
            bad_request,
            parse_int_or,
        },
        snapshot_storage::SnapshotStorage,
    },
    snapshot::{
        CollectionEdgeEvent,
        CollectionSnapshot,
        DEFAULT_PAGE_LIMIT,
    },
};
use actix_web::{
    App,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    web,
};
use anyhow::Context;
use std::{
    collections::HashMap,
    net::TcpListener,
    thread::JoinHandle,
};

/// HTTP face of the collection cache. The server runs on its own thread and
/// stops when this value is dropped.
pub struct ActixCollectionApi {
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixCollectionApi {
    pub fn new<S: SnapshotStorage>(
        host: &str,
        port: Option<u16>,
        api_key: ApiKey,
        actors: CollectionActors<S>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port.unwrap_or(0)))
            .context("failed to bind HTTP listener for collection API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("collection API listening on {}", base_url);

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(actors.clone()))
                .app_data(web::Data::new(api_key.clone()))
                .route("/collection", web::get().to(handle_get::<S>))
                .route("/collection/snapshot", web::put().to(handle_snapshot::<S>))
                .route("/collection/event", web::post().to(handle_event::<S>))
        })
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(self) {
        self.server_handle.stop(true).await;
    }
}

impl Drop for ActixCollectionApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

async fn handle_get<S: SnapshotStorage>(
    _auth: Authorized,
    actors: web::Data<CollectionActors<S>>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    let Some(user_id) = query.get("userId").filter(|id| !id.trim().is_empty()) else {
        return bad_request("userId is required");
    };
    let limit = parse_int_or(query.get("limit"), DEFAULT_PAGE_LIMIT as i64).max(1);
    let offset = parse_int_or(query.get("offset"), 0).max(0);
    let limit = usize::try_from(limit).unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = usize::try_from(offset).unwrap_or(0);

    match actors.get(user_id, limit, offset).await {
        Ok(Some(page)) => HttpResponse::Ok().json(page),
        Ok(None) => HttpResponse::NotFound().finish(),
        Err(e) => {
            tracing::warn!("collection read for {user_id} failed: {e}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

async fn handle_snapshot<S: SnapshotStorage>(
    _auth: Authorized,
    actors: web::Data<CollectionActors<S>>,
    body: web::Bytes,
) -> HttpResponse {
    let body = LenientBody::parse(&body);
    let (user_id, snapshot) = match (
        body.required_id("userId"),
        body.required::<CollectionSnapshot>("snapshot"),
    ) {
        (Ok(user_id), Ok(snapshot)) => (user_id, snapshot),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    tracing::info!(
        "hydrating collection for {user_id} ({} entries)",
        snapshot.entries.len()
    );
    match actors.put(&user_id, snapshot).await {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => {
            tracing::warn!("snapshot write for {user_id} failed: {e}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

async fn handle_event<S: SnapshotStorage>(
    _auth: Authorized,
    actors: web::Data<CollectionActors<S>>,
    body: web::Bytes,
) -> HttpResponse {
    let body = LenientBody::parse(&body);
    let (user_id, event) = match (
        body.required_id("userId"),
        body.required::<CollectionEdgeEvent>("event"),
    ) {
        (Ok(user_id), Ok(event)) => (user_id, event),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    match actors.apply(&user_id, event).await {
        Ok(Applied::Applied) => HttpResponse::Ok().finish(),
        Ok(Applied::Cold) => {
            tracing::debug!("dropped event for cold collection {user_id}");
            HttpResponse::Accepted().finish()
        }
        Err(e) => {
            tracing::warn!("event for {user_id} failed: {e}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::in_memory_snapshot_storage::InMemorySnapshotStorage,
        snapshot::{
            CollectionEntry,
            CollectionPage,
        },
    };
    use chrono::Utc;
    use gacha_core::CardId;
    use reqwest::StatusCode;
    use serde_json::json;
    use tokio::runtime::Handle;

    const KEY: &str = "test-key";

    fn api() -> ActixCollectionApi {
        let actors = CollectionActors::new(InMemorySnapshotStorage::new(), Handle::current());
        ActixCollectionApi::new("127.0.0.1", None, ApiKey::new(KEY), actors).unwrap()
    }

    fn entry(id: &str) -> CollectionEntry {
        CollectionEntry {
            id: id.to_string(),
            card_id: CardId::new("kenta:card12_hero"),
            serial_number: Some(3),
            obtained_at: Utc::now(),
            card: None,
        }
    }

    #[tokio::test]
    async fn get__cold_user__returns_404() {
        // given
        let api = api();
        let client = reqwest::Client::new();

        // when
        let response = client
            .get(format!("{}/collection?userId=u1", api.base_url()))
            .bearer_auth(KEY)
            .send()
            .await
            .unwrap();

        // then
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn requests__without_or_with_wrong_key__are_rejected() {
        // given
        let api = api();
        let client = reqwest::Client::new();
        let url = format!("{}/collection?userId=u1", api.base_url());

        // when
        let missing = client.get(&url).send().await.unwrap();
        let wrong = client.get(&url).bearer_auth("nope").send().await.unwrap();

        // then
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn event__malformed_body__returns_400_naming_field() {
        // given
        let api = api();
        let client = reqwest::Client::new();

        // when
        let response = client
            .post(format!("{}/collection/event", api.base_url()))
            .bearer_auth(KEY)
            .body("{oops")
            .send()
            .await
            .unwrap();

        // then
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.text().await.unwrap().contains("userId"));
    }

    #[tokio::test]
    async fn blank_user_id__returns_400_and_stores_nothing() {
        // given
        let api = api();
        let client = reqwest::Client::new();
        let base = api.base_url().to_string();

        // when
        let put = client
            .put(format!("{base}/collection/snapshot"))
            .bearer_auth(KEY)
            .json(&json!({ "userId": "", "snapshot": CollectionSnapshot::empty(60, Utc::now()) }))
            .send()
            .await
            .unwrap();
        let get = client
            .get(format!("{base}/collection?userId=%20"))
            .bearer_auth(KEY)
            .send()
            .await
            .unwrap();

        // then
        assert_eq!(put.status(), StatusCode::BAD_REQUEST);
        assert!(put.text().await.unwrap().contains("userId"));
        assert_eq!(get.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn snapshot_then_events__round_trip_through_http() {
        // given
        let api = api();
        let client = reqwest::Client::new();
        let base = api.base_url().to_string();
        let cold_event = client
            .post(format!("{base}/collection/event"))
            .bearer_auth(KEY)
            .json(&json!({ "userId": "u1", "event": CollectionEdgeEvent::add(entry("inv-0"), 1) }))
            .send()
            .await
            .unwrap();
        assert_eq!(cold_event.status(), StatusCode::ACCEPTED);

        // when
        let put = client
            .put(format!("{base}/collection/snapshot"))
            .bearer_auth(KEY)
            .json(&json!({ "userId": "u1", "snapshot": CollectionSnapshot::empty(60, Utc::now()) }))
            .send()
            .await
            .unwrap();
        for id in ["inv-1", "inv-2"] {
            let applied = client
                .post(format!("{base}/collection/event"))
                .bearer_auth(KEY)
                .json(&json!({ "userId": "u1", "event": CollectionEdgeEvent::add(entry(id), 1) }))
                .send()
                .await
                .unwrap();
            assert_eq!(applied.status(), StatusCode::OK);
        }
        let page: CollectionPage = client
            .get(format!("{base}/collection?userId=u1&limit=1&offset=abc"))
            .bearer_auth(KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        // then
        assert_eq!(put.status(), StatusCode::NO_CONTENT);
        assert_eq!(page.total_owned, 2);
        assert_eq!(page.distinct_owned, 2);
        assert_eq!(page.collection.len(), 1);
        assert_eq!(page.page.offset, 0);
        assert!(page.page.has_more);
    }
}
