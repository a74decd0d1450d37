use crate::{
    Error,
    Result,
    cache_client::CollectionCacheClient,
    ledger::{
        LedgerStore,
        PendingResult,
    },
    orchestrator::{
        DEFAULT_BATCH_SIZE,
        Orchestrator,
    },
};
use actix_web::{
    App,
    HttpResponse,
    HttpServer,
    ResponseError,
    dev::ServerHandle,
    http::StatusCode,
    web,
};
use anyhow::Context;
use chrono::Utc;
use collection_cache::{
    app::request::{
        ApiKey,
        Authorized,
        LenientBody,
        bad_request,
        parse_int_or,
    },
    snapshot::DEFAULT_PAGE_LIMIT,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    net::TcpListener,
    thread::JoinHandle,
};

/// Tells clients whether a collection page came from the edge cache or was
/// rebuilt from the ledger.
pub const COLLECTION_SOURCE_HEADER: &str = "x-collection-source";

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::PendingNotFound(_) | Error::InventoryNotFound(_) => StatusCode::NOT_FOUND,
            Error::NotOwner(_) | Error::NotSender(_) => StatusCode::FORBIDDEN,
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::UnknownCard(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            Error::Unavailable(_) => HttpResponse::build(status).body("gacha unavailable"),
            Error::UnknownCard(_) | Error::Internal(_) => {
                HttpResponse::build(status).body("internal error")
            }
            other => HttpResponse::build(status).body(other.to_string()),
        }
    }
}

fn respond<T: Serialize>(result: Result<T>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::warn!("request failed: {e:#}");
            } else {
                tracing::debug!("request rejected: {e}");
            }
            e.error_response()
        }
    }
}

/// Where collection reads go before falling back to the ledger.
#[derive(Clone)]
struct ReadThrough {
    cache: Option<CollectionCacheClient>,
}

/// HTTP face of the gacha service, served from its own thread.
pub struct ActixGachaApi {
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixGachaApi {
    pub fn new<S: LedgerStore>(
        host: &str,
        port: Option<u16>,
        api_key: ApiKey,
        orchestrator: Orchestrator<S>,
        cache: Option<CollectionCacheClient>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port.unwrap_or(0)))
            .context("failed to bind HTTP listener for gacha API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("gacha API listening on {}", base_url);

        let read_through = ReadThrough { cache };
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(orchestrator.clone()))
                .app_data(web::Data::new(api_key.clone()))
                .app_data(web::Data::new(read_through.clone()))
                .route("/gacha/pull", web::post().to(handle_pull::<S>))
                .route("/gacha/pull-batch", web::post().to(handle_pull_batch::<S>))
                .route("/gacha/claim", web::post().to(handle_claim::<S>))
                .route("/gacha/pending", web::get().to(handle_pending::<S>))
                .route("/gacha/collection", web::get().to(handle_collection::<S>))
                .route("/collection/transfer", web::post().to(handle_transfer::<S>))
                .route(
                    "/admin/pending-summary",
                    web::get().to(handle_pending_summary::<S>),
                )
                .route("/admin/sweep", web::post().to(handle_sweep::<S>))
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

    pub async fn shutdown(self) {
        self.server_handle.stop(true).await;
    }
}

impl Drop for ActixGachaApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

fn user_and_session(body: &LenientBody) -> std::result::Result<(String, String), HttpResponse> {
    Ok((body.required_id("userId")?, body.required_id("sessionId")?))
}

/// Runs a ledger call on the actix blocking pool.
async fn blocking<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    web::block(call)
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!("ledger task failed: {e}")))?
}

async fn handle_pull<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
    body: web::Bytes,
) -> HttpResponse {
    let (user_id, session_id) = match user_and_session(&LenientBody::parse(&body)) {
        Ok(ids) => ids,
        Err(response) => return response,
    };
    respond(
        blocking(move || gacha.pull_single(&user_id, &session_id, &mut rand::rng())).await,
    )
}

async fn handle_pull_batch<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
    query: web::Query<HashMap<String, String>>,
    body: web::Bytes,
) -> HttpResponse {
    let count = match query.get("count") {
        None => DEFAULT_BATCH_SIZE,
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(count) => count,
            Err(_) => return bad_request("count must be a positive integer"),
        },
    };
    let (user_id, session_id) = match user_and_session(&LenientBody::parse(&body)) {
        Ok(ids) => ids,
        Err(response) => return response,
    };
    respond(
        blocking(move || gacha.run_batch(&user_id, &session_id, count, &mut rand::rng())).await,
    )
}

async fn handle_claim<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
    body: web::Bytes,
) -> HttpResponse {
    let body = LenientBody::parse(&body);
    let (result_id, user_id) = match (
        body.required_id("resultId"),
        body.optional::<String>("userId"),
    ) {
        (Ok(result_id), Ok(user_id)) => (result_id, user_id),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    respond(
        blocking(move || {
            let ledger = gacha.ledger();
            match user_id {
                Some(user_id) => ledger.claim_as(&result_id, &user_id),
                None => ledger.claim(&result_id),
            }
        })
        .await,
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingResponse {
    has_pending: bool,
    pulls: Vec<PendingResult>,
}

async fn handle_pending<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    let present = |name: &str| query.get(name).filter(|id| !id.trim().is_empty()).cloned();
    let (Some(user_id), Some(session_id)) = (present("userId"), present("sessionId")) else {
        return bad_request("userId and sessionId are required");
    };
    respond(
        blocking(move || gacha.ledger().pending_for(&user_id, &session_id, Utc::now()))
            .await
            .map(|pulls| PendingResponse {
                has_pending: !pulls.is_empty(),
                pulls,
            }),
    )
}

async fn handle_collection<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
    read_through: web::Data<ReadThrough>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    let Some(user_id) = query.get("userId").filter(|id| !id.trim().is_empty()).cloned() else {
        return bad_request("userId is required");
    };
    let limit = usize::try_from(parse_int_or(query.get("limit"), DEFAULT_PAGE_LIMIT as i64).max(1))
        .unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = usize::try_from(parse_int_or(query.get("offset"), 0).max(0)).unwrap_or(0);

    if let Some(cache) = &read_through.cache {
        match cache.page(&user_id, limit, offset).await {
            Ok(Some(page)) => {
                return HttpResponse::Ok()
                    .insert_header((COLLECTION_SOURCE_HEADER, "edge"))
                    .json(page);
            }
            Ok(None) => tracing::debug!("collection cache miss for {user_id}"),
            Err(e) => tracing::warn!("collection cache read for {user_id} failed: {e:#}"),
        }
    }

    let snapshot = match blocking({
        let user_id = user_id.clone();
        move || gacha.ledger().collection_snapshot(&user_id, Utc::now())
    })
    .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => return respond::<()>(Err(e)),
    };
    let page = snapshot.page(limit, offset);
    if let Some(cache) = read_through.cache.clone() {
        actix_web::rt::spawn(async move {
            match cache.put_snapshot(&user_id, &snapshot).await {
                Ok(()) => tracing::debug!("re-hydrated collection cache for {user_id}"),
                Err(e) => tracing::warn!("failed to hydrate collection cache for {user_id}: {e:#}"),
            }
        });
    }
    HttpResponse::Ok()
        .insert_header((COLLECTION_SOURCE_HEADER, "store"))
        .json(page)
}

async fn handle_transfer<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
    body: web::Bytes,
) -> HttpResponse {
    let body = LenientBody::parse(&body);
    let (from_user_id, to_user_id, inventory_id) = match (
        body.required_id("fromUserId"),
        body.required_id("toUserId"),
        body.required_id("inventoryId"),
    ) {
        (Ok(from), Ok(to), Ok(inventory)) => (from, to, inventory),
        (Err(response), _, _) | (_, Err(response), _) | (_, _, Err(response)) => {
            return response;
        }
    };
    respond(
        blocking(move || {
            gacha
                .ledger()
                .transfer(&from_user_id, &to_user_id, &inventory_id)
        })
        .await,
    )
}

async fn handle_pending_summary<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
    query: web::Query<HashMap<String, String>>,
) -> HttpResponse {
    let user_id = query.get("userId").filter(|id| !id.trim().is_empty()).cloned();
    respond(
        blocking(move || gacha.ledger().pending_summary(user_id.as_deref(), Utc::now())).await,
    )
}

async fn handle_sweep<S: LedgerStore>(
    _auth: Authorized,
    gacha: web::Data<Orchestrator<S>>,
) -> HttpResponse {
    respond(blocking(move || gacha.ledger().sweep_stale(Utc::now())).await)
}
