use anyhow::{
    Context,
    Result,
    anyhow,
};
use collection_cache::snapshot::{
    CollectionEdgeEvent,
    CollectionPage,
    CollectionSnapshot,
};
use reqwest::StatusCode;
use serde_json::json;

/// HTTP client for the collection cache service.
#[derive(Clone)]
pub struct CollectionCacheClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl CollectionCacheClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for collection cache")?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `None` when the cache holds nothing for the user.
    pub async fn page(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Option<CollectionPage>> {
        let url = format!("{}/collection", self.base_url);
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("userId", user_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await
            .context("collection cache request failed")?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(anyhow!("collection cache returned {status}"));
        }
        let page = res
            .json::<CollectionPage>()
            .await
            .context("failed to parse collection page")?;
        Ok(Some(page))
    }

    pub async fn put_snapshot(&self, user_id: &str, snapshot: &CollectionSnapshot) -> Result<()> {
        let url = format!("{}/collection/snapshot", self.base_url);
        self.http
            .put(url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "userId": user_id, "snapshot": snapshot }))
            .send()
            .await
            .context("collection snapshot request failed")?
            .error_for_status()
            .context("collection cache rejected snapshot")?;
        Ok(())
    }

    /// Returns `false` when the cache was cold and dropped the event.
    pub async fn post_event(&self, user_id: &str, event: &CollectionEdgeEvent) -> Result<bool> {
        let url = format!("{}/collection/event", self.base_url);
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "userId": user_id, "event": event }))
            .send()
            .await
            .context("collection event request failed")?
            .error_for_status()
            .context("collection cache rejected event")?;
        Ok(res.status() != StatusCode::ACCEPTED)
    }
}
