//! [`HistoryFetcher`] over the conversation events HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::{config::HistoryConfig, models::RawEvent};
use tracing::{debug, trace};
use url::Url;

use crate::{error::FetchError, history::HistoryFetcher};

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<RawEvent>,
    #[serde(default)]
    cursor: Option<String>,
}

/// Fetches past events with `GET {base}/conversations/{cid}/events`,
/// following the `cursor` of each page until enough events were collected or
/// the server has no more.
#[derive(Debug, Clone)]
pub struct HttpHistoryFetcher {
    base_url: Url,
    client: Client,
    page_size: usize,
    auth_token: Option<String>,
}

impl HttpHistoryFetcher {
    /// Builds a fetcher for the endpoint in `config`.
    ///
    /// # Errors
    /// Fails when no base URL is configured, the URL is invalid, or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &HistoryConfig) -> Result<Self, FetchError> {
        let base = config
            .base_url
            .as_deref()
            .ok_or_else(|| FetchError::InvalidEndpoint("no history base URL configured".into()))?;
        let base_url = Url::parse(base.trim_end_matches('/'))
            .map_err(|err| FetchError::InvalidEndpoint(format!("{base}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::InvalidEndpoint(base.to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            base_url,
            client,
            page_size: config.page_size.max(1),
            auth_token: config.auth_token.clone(),
        })
    }

    fn events_url(&self, cid: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["conversations", cid, "events"]);
        }
        url
    }

    async fn fetch_page(
        &self,
        cid: &str,
        start_id: i64,
        end_id: i64,
        cursor: Option<&str>,
    ) -> Result<EventsPage, FetchError> {
        let mut request = self.client.get(self.events_url(cid)).query(&[
            ("start_id", start_id.to_string()),
            ("end_id", end_id.to_string()),
            ("page_size", self.page_size.to_string()),
        ]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        trace!(cid, start_id, end_id, cursor = ?cursor, "requesting history page");

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                cid: cid.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

#[async_trait]
impl HistoryFetcher for HttpHistoryFetcher {
    async fn fetch(
        &self,
        cid: &str,
        start_id: i64,
        count: usize,
    ) -> Result<Vec<RawEvent>, FetchError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let span = i64::try_from(count).unwrap_or(i64::MAX);
        let end_id = start_id.saturating_add(span - 1);

        let mut events = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .fetch_page(cid, start_id, end_id, cursor.as_deref())
                .await?;
            let received = page.events.len();
            events.extend(page.events);

            match page.cursor {
                Some(next) if received > 0 && events.len() < count => cursor = Some(next),
                _ => break,
            }
        }

        events.truncate(count);
        debug!(cid, start_id, count, found = events.len(), "fetched history over HTTP");
        Ok(events)
    }
}
