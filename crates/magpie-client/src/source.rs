use std::time::Duration;

use magpie_core::error::HarvestError;
use magpie_core::models::Cursor;
use magpie_core::traits::ContentSource;
use reqwest::Client;
use serde_json::Value;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("Magpie/", env!("CARGO_PKG_VERSION"));

/// HTTP implementation of [`ContentSource`] using reqwest.
///
/// Issues plain GETs against the configured API base URL and returns
/// the raw JSON payloads; all retry/backoff policy lives in the core
/// stages, not here. Transport failures are classified into the core
/// error taxonomy so the stages can tell transient from terminal.
#[derive(Clone, Debug)]
pub struct HttpContentSource {
    client: Client,
    base_url: Url,
    timeout_secs: u64,
}

impl HttpContentSource {
    pub fn new(base_url: &str) -> Result<Self, HarvestError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, HarvestError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| HarvestError::Config(format!("invalid base URL `{base_url}`: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Check that the remote source answers at all. Used at startup so
    /// an unreachable API aborts the process instead of spinning in
    /// page-retry loops.
    pub async fn ping(&self) -> Result<(), HarvestError> {
        let url = self.endpoint(&["ping"], &[])?;
        self.get_json(url).await.map(|_| ())
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, HarvestError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| HarvestError::Config("base URL cannot be a base".into()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, HarvestError> {
        tracing::debug!(url = %url, "GET");
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                HarvestError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                HarvestError::Network(format!("connection failed: {e}"))
            } else {
                HarvestError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| HarvestError::Payload(format!("response was not JSON: {e}")))
    }
}

impl ContentSource for HttpContentSource {
    async fn topic_authors_page(
        &self,
        topic: &str,
        after: Option<&Cursor>,
    ) -> Result<Value, HarvestError> {
        let mut query = Vec::new();
        if let Some(cursor) = after {
            query.push(("after", cursor.as_str()));
        }
        let url = self.endpoint(&["topics", topic, "authors"], &query)?;
        self.get_json(url).await
    }

    async fn author_detail(&self, username: &str) -> Result<Value, HarvestError> {
        let url = self.endpoint(&["authors", username], &[])?;
        self.get_json(url).await
    }

    async fn author_posts(&self, username: &str) -> Result<Value, HarvestError> {
        let url = self.endpoint(&["authors", username, "posts"], &[])?;
        self.get_json(url).await
    }

    async fn post_body(&self, post_id: &str) -> Result<Value, HarvestError> {
        let url = self.endpoint(&["posts", post_id, "body"], &[])?;
        self.get_json(url).await
    }

    async fn followers_page(
        &self,
        username: &str,
        from: Option<&Cursor>,
    ) -> Result<Value, HarvestError> {
        let mut query = Vec::new();
        if let Some(cursor) = from {
            query.push(("from", cursor.as_str()));
        }
        let url = self.endpoint(&["authors", username, "followers"], &query)?;
        self.get_json(url).await
    }
}
