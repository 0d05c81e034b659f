//! PowerQuery-style REST adapter for the source API.
//!
//! A thin client: OAuth2 client-credentials token fetch, a count
//! endpoint, and a paginated record endpoint. All extraction logic lives
//! upstream; this module only maps HTTP outcomes onto the source error
//! taxonomy.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use snafu::prelude::*;
use std::sync::LazyLock;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

use super::SourceClient;
use crate::emit;
use crate::error::{ConnectSnafu, SourceError};
use crate::metrics::events::{RequestStatus, SourceOperation, SourceRequest, SourceRequestDuration};

/// The source's published maximum page size.
const MAX_PAGE_SIZE: u32 = 1000;

/// Matches the source's complaint about a filter field it does not
/// recognize, e.g. on tables without the change-tracking column.
static INVALID_FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)invalid\s+field[:\s]+([A-Za-z_][A-Za-z0-9_.]*)").expect("valid pattern")
});

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    record: Vec<Value>,
}

/// REST client with lazily fetched bearer token.
pub struct RestSourceClient {
    http: reqwest::Client,
    host: String,
    client_id: String,
    client_secret: String,
    page_size: u32,
    token: Mutex<Option<String>>,
}

impl RestSourceClient {
    pub fn new(
        host: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        page_size: Option<u32>,
    ) -> Self {
        let host = host.into();
        let host = host.trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            host,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            page_size: page_size.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE),
            token: Mutex::new(None),
        }
    }

    /// Fetch (or reuse) the bearer token.
    async fn token(&self) -> Result<String, SourceError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let response = self
            .http
            .post(format!("{}/oauth/access_token", self.host))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context(ConnectSnafu)?;

        if !response.status().is_success() {
            return Err(SourceError::Auth {
                message: format!("token endpoint returned HTTP {}", response.status()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| SourceError::Decode {
            message: e.to_string(),
        })?;
        debug!("Acquired source API token");
        *guard = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    /// Issue a GET, refreshing the token once on a 401.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let mut refreshed = false;
        loop {
            let token = self.token().await?;
            let result = self
                .http
                .get(url)
                .bearer_auth(&token)
                .query(params)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(SourceError::Timeout {
                        table: table.to_string(),
                    });
                }
                Err(e) => return Err(SourceError::Connect { source: e }),
            };

            let status = response.status();
            if status.as_u16() == 401 && !refreshed {
                // Token expired mid-run: drop it and retry once.
                self.token.lock().await.take();
                refreshed = true;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_failure(status.as_u16(), &body));
            }

            return response.json().await.map_err(|e| SourceError::Decode {
                message: e.to_string(),
            });
        }
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify_failure(status: u16, body: &str) -> SourceError {
    if let Some(captures) = INVALID_FIELD_PATTERN.captures(body) {
        return SourceError::InvalidField {
            field: captures[1].to_string(),
        };
    }
    let message: String = body.chars().take(200).collect();
    SourceError::Http { status, message }
}

#[async_trait]
impl SourceClient for RestSourceClient {
    async fn count(&self, table: &str, filter: Option<&str>) -> Result<u64, SourceError> {
        let url = format!("{}/ws/schema/table/{}/count", self.host, table);
        let mut params = Vec::new();
        if let Some(q) = filter {
            params.push(("q", q.to_string()));
        }

        let start = Instant::now();
        let result: Result<CountResponse, _> = self.get_json(table, &url, &params).await;
        emit!(SourceRequest {
            operation: SourceOperation::Count,
            status: RequestStatus::from_result(&result),
        });
        emit!(SourceRequestDuration {
            operation: SourceOperation::Count,
            duration: start.elapsed(),
        });

        result.map(|r| r.count)
    }

    async fn query(
        &self,
        table: &str,
        filter: Option<&str>,
        projection: Option<&str>,
        page: u32,
    ) -> Result<Vec<Value>, SourceError> {
        let url = format!("{}/ws/schema/table/{}", self.host, table);
        let mut params = vec![
            ("page", page.to_string()),
            ("pagesize", self.page_size.to_string()),
            ("projection", projection.unwrap_or("*").to_string()),
        ];
        if let Some(q) = filter {
            params.push(("q", q.to_string()));
        }

        let start = Instant::now();
        let result: Result<RecordsResponse, _> = self.get_json(table, &url, &params).await;
        emit!(SourceRequest {
            operation: SourceOperation::Query,
            status: RequestStatus::from_result(&result),
        });
        emit!(SourceRequestDuration {
            operation: SourceOperation::Query,
            duration: start.elapsed(),
        });

        result.map(|r| r.record)
    }

    fn max_page_size(&self) -> u32 {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_invalid_field() {
        let err = classify_failure(400, r#"{"message":"Invalid field: whenmodified"}"#);
        assert!(matches!(
            err,
            SourceError::InvalidField { field } if field == "whenmodified"
        ));
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let err = classify_failure(502, "bad gateway");
        assert!(err.is_transient());
    }

    #[test]
    fn test_page_size_clamped_to_maximum() {
        let client = RestSourceClient::new("https://x", "id", "secret", Some(5000));
        assert_eq!(client.max_page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_host_trailing_slash_trimmed() {
        let client = RestSourceClient::new("https://x/", "id", "secret", None);
        assert_eq!(client.host, "https://x");
    }
}
