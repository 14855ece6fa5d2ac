//! REST client for the managed remote data service.
//!
//! Routes (relative to the configured base URL):
//! - `GET|PUT|DELETE /v1/collections/{collection}/records/{key}`
//! - `GET /v1/collections/{collection}/records?prefix=&include_deleted=&limit=`
//! - `GET /v1/collections`, `GET /v1/stats`, `GET /v1/health`
//! - `GET /v1/changes?since={ms}`

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{BackendId, Record};
use crate::util::compact_text;

use super::{BackendStats, ListFilter, RemoteStore, StorageBackend};

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("auth_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Build a client from configuration; requires both URL and token.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let (Some(base_url), Some(auth_token)) = (&config.url, &config.auth_token) else {
            return Err(Error::Validation(
                "remote requires both url and auth_token".to_string(),
            ));
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.clone(),
            client: reqwest::Client::builder().timeout(config.timeout()).build()?,
        })
    }

    fn record_url(&self, collection: &str, key: &str) -> String {
        format!(
            "{}/v1/collections/{}/records/{}",
            self.base_url,
            urlencoding::encode(collection),
            urlencoding::encode(key)
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.auth_token)
            .header("Accept", "application/json")
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let response = Self::check(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Map non-success statuses: 5xx/408/429 mean the service is unavailable,
    /// anything else is a request problem.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            Err(Error::unavailable(BackendId::Remote, message))
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound(message))
        } else {
            Err(Error::Validation(message))
        }
    }
}

#[async_trait]
impl StorageBackend for HttpRemote {
    fn id(&self) -> BackendId {
        BackendId::Remote
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let response = self
            .get_request(&self.record_url(collection, key))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).await.map(Some)
    }

    async fn put(&self, record: Record) -> Result<Record> {
        let response = self
            .client
            .put(self.record_url(&record.collection, &record.key))
            .bearer_auth(&self.auth_token)
            .json(&record)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.record_url(collection, key))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>> {
        let mut query = vec![(
            "include_deleted",
            filter.include_deleted.to_string(),
        )];
        if let Some(prefix) = &filter.key_prefix {
            query.push(("prefix", prefix.clone()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }

        let url = self.url(&format!(
            "/v1/collections/{}/records",
            urlencoding::encode(collection)
        ));
        let response = self.get_request(&url).query(&query).send().await?;
        Self::read_json(response).await
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let response = self.get_request(&self.url("/v1/collections")).send().await?;
        Self::read_json(response).await
    }

    async fn stats(&self) -> Result<BackendStats> {
        let response = self.get_request(&self.url("/v1/stats")).send().await?;
        Self::read_json(response).await
    }

    /// The service exposes a dedicated health route; no write round trip.
    async fn probe(&self) -> Result<()> {
        let response = self.get_request(&self.url("/v1/health")).send().await?;
        Self::check(response).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn changes_since(&self, since_ms: i64) -> Result<Vec<Record>> {
        let response = self
            .get_request(&self.url("/v1/changes"))
            .query(&[("since", since_ms)])
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> HttpRemote {
        HttpRemote::from_config(&RemoteConfig::new("https://data.example.com/", "secret")).unwrap()
    }

    #[test]
    fn from_config_requires_url_and_token() {
        assert!(HttpRemote::from_config(&RemoteConfig::default()).is_err());
    }

    #[test]
    fn record_url_encodes_segments() {
        assert_eq!(
            remote().record_url("user carts", "a/b"),
            "https://data.example.com/v1/collections/user%20carts/records/a%2Fb"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", remote());
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"message":"bad key"}"#),
            "bad key (400)"
        );
        assert_eq!(
            parse_api_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            "HTTP 503"
        );
    }
}
