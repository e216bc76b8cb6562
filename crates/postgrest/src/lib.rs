//! PostgREST client for the Lost & Found row store
//!
//! A consuming builder over the `/rest/v1/{table}` endpoint. Every request
//! carries the project API key and, once [`PostgrestClient::with_auth`] is
//! called, the caller's bearer token so row-level security sees the right
//! identity.
//!
//! - Query API (`select`, `insert`, `update`, `delete`)
//! - Equality filtering, ordering and row limits
//! - Structured decoding of PostgREST error bodies

use log::{debug, trace};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Error body returned by PostgREST on a failed request
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgrestApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for PostgrestApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: PostgrestApiErrorDetails,
        status: StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError { message: String, status: StatusCode },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl PostgrestError {
    /// HTTP status of an API failure, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PostgrestError::ApiError { status, .. } => Some(*status),
            PostgrestError::UnparsedApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// PostgREST / Postgres error code such as `42501` or `PGRST116`.
    pub fn code(&self) -> Option<&str> {
        match self {
            PostgrestError::ApiError { details, .. } => details.code.as_deref(),
            _ => None,
        }
    }

    /// Human readable message as the server phrased it.
    pub fn message(&self) -> String {
        match self {
            PostgrestError::ApiError { details, .. } => details
                .message
                .clone()
                .unwrap_or_else(|| details.to_string()),
            PostgrestError::UnparsedApiError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Builder for a single request against one table
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    base_url: String,
    api_key: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
}

impl PostgrestClient {
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            table: table.to_string(),
            http_client,
            headers: HeaderMap::new(),
            query_params: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, PostgrestError> {
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header value: {}", value))
        })?;
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header name: {}", key))
        })?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Sends `token` as the bearer credential instead of the API key.
    pub fn with_auth(self, token: &str) -> Result<Self, PostgrestError> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.set_param("select", columns.to_string());
        self
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.query_params
            .push((column.to_string(), format!("eq.{}", value)));
        self
    }

    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        self.set_param("order", format!("{}.{}", column, order.as_str()));
        self
    }

    pub fn limit(mut self, count: u32) -> Self {
        self.set_param("limit", count.to_string());
        self
    }

    /// Runs the query and returns every matching row.
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, PostgrestError> {
        let body = self.send(Method::GET, None, false).await?;
        parse_rows(&body)
    }

    /// Runs the query limited to one row; an empty result is `Ok(None)`.
    pub async fn maybe_single<T: DeserializeOwned>(self) -> Result<Option<T>, PostgrestError> {
        let rows: Vec<T> = self.limit(1).execute().await?;
        Ok(rows.into_iter().next())
    }

    /// Inserts `values` and returns the stored representation.
    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        values: T,
    ) -> Result<Vec<R>, PostgrestError> {
        let payload = serde_json::to_value(values)?;
        let body = self.send(Method::POST, Some(payload), true).await?;
        parse_rows(&body)
    }

    /// Patches every row matching the filters and returns them.
    pub async fn update<T: Serialize, R: DeserializeOwned>(
        &self,
        values: T,
    ) -> Result<Vec<R>, PostgrestError> {
        self.require_filter("update")?;
        let payload = serde_json::to_value(values)?;
        let body = self.send(Method::PATCH, Some(payload), true).await?;
        parse_rows(&body)
    }

    /// Deletes every row matching the filters and returns the removed rows.
    ///
    /// Rows hidden by row-level security are silently skipped by the server,
    /// so an empty result means nothing was deleted.
    pub async fn delete<R: DeserializeOwned>(&self) -> Result<Vec<R>, PostgrestError> {
        self.require_filter("delete")?;
        let body = self.send(Method::DELETE, None, true).await?;
        parse_rows(&body)
    }

    fn set_param(&mut self, key: &str, value: String) {
        self.query_params.retain(|(k, _)| k != key);
        self.query_params.push((key.to_string(), value));
    }

    fn require_filter(&self, operation: &str) -> Result<(), PostgrestError> {
        let filtered = self
            .query_params
            .iter()
            .any(|(_, v)| v.starts_with("eq."));
        if filtered {
            Ok(())
        } else {
            Err(PostgrestError::InvalidParameters(format!(
                "{} on '{}' requires at least one filter",
                operation, self.table
            )))
        }
    }

    fn build_url(&self) -> Result<Url, PostgrestError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request_headers(&self, return_representation: bool) -> Result<HeaderMap, PostgrestError> {
        let api_key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| PostgrestError::InvalidParameters("Invalid API key".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert("apikey", api_key.clone());
        if !self.headers.contains_key("authorization") {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| PostgrestError::InvalidParameters("Invalid API key".to_string()))?;
            headers.insert("Authorization", bearer);
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if return_representation {
            headers.insert(
                HeaderName::from_static("prefer"),
                HeaderValue::from_static("return=representation"),
            );
        }
        headers.extend(self.headers.clone());
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        payload: Option<serde_json::Value>,
        return_representation: bool,
    ) -> Result<String, PostgrestError> {
        let url = self.build_url()?;
        debug!("{} {}", method, url);

        let mut request = self
            .http_client
            .request(method, url)
            .headers(self.request_headers(return_representation)?);
        if let Some(payload) = payload {
            request = request.json(&payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        trace!("response {} from '{}': {}", status, self.table, body);

        if status.is_success() {
            Ok(body)
        } else {
            Err(decode_error(status, body))
        }
    }
}

fn decode_error(status: StatusCode, body: String) -> PostgrestError {
    match serde_json::from_str::<PostgrestApiErrorDetails>(&body) {
        Ok(details) => PostgrestError::ApiError { details, status },
        Err(_) => PostgrestError::UnparsedApiError {
            message: body,
            status,
        },
    }
}

fn parse_rows<R: DeserializeOwned>(body: &str) -> Result<Vec<R>, PostgrestError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Vec<R>>(body)
        .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, table: &str) -> PostgrestClient {
        PostgrestClient::new(&server.uri(), "anon-key", table, Client::new())
    }

    #[tokio::test]
    async fn test_select_with_filter_and_order() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(query_param("select", "*"))
            .and(query_param("type", "eq.lost"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "anon-key"))
            .and(header("Authorization", "Bearer anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "b", "title": "Dompet" },
                { "id": "a", "title": "Kunci" }
            ])))
            .mount(&mock_server)
            .await;

        let rows: Vec<Value> = client(&mock_server, "items")
            .select("*")
            .eq("type", "lost")
            .order("created_at", SortOrder::Descending)
            .execute()
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], "Dompet");
    }

    #[tokio::test]
    async fn test_with_auth_overrides_bearer() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rows: Vec<Value> = client(&mock_server, "profiles")
            .with_auth("user-token")
            .unwrap()
            .select("*")
            .execute()
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_maybe_single_returns_none_on_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let row: Option<Value> = client(&mock_server, "items")
            .select("*")
            .eq("id", "missing")
            .maybe_single()
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_insert_returns_representation() {
        let mock_server = MockServer::start().await;
        let new_row = json!({ "title": "Payung", "type": "found" });

        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .and(header("prefer", "return=representation"))
            .and(body_json(&new_row))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                { "id": "c1", "title": "Payung", "type": "found" }
            ])))
            .mount(&mock_server)
            .await;

        let rows: Vec<Value> = client(&mock_server, "items")
            .insert(new_row)
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], "c1");
    }

    #[tokio::test]
    async fn test_update_requires_filter() {
        let mock_server = MockServer::start().await;
        let result: Result<Vec<Value>, _> = client(&mock_server, "items")
            .update(json!({ "type": "found" }))
            .await;
        assert!(matches!(result, Err(PostgrestError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_delete_with_filter() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/items"))
            .and(query_param("id", "eq.c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "c1" }])))
            .mount(&mock_server)
            .await;

        let rows: Vec<Value> = client(&mock_server, "items")
            .eq("id", "c1")
            .delete()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_api_error_is_decoded() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": "42501",
                "message": "new row violates row-level security policy for table \"items\"",
                "details": null,
                "hint": null
            })))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server, "items")
            .insert::<_, Value>(json!({ "title": "x" }))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(err.code(), Some("42501"));
        assert!(err.message().contains("row-level security"));
    }

    #[tokio::test]
    async fn test_unparsed_error_keeps_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad gateway"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server, "items")
            .execute::<Value>()
            .await
            .unwrap_err();
        assert!(matches!(err, PostgrestError::UnparsedApiError { .. }));
        assert_eq!(err.message(), "Bad gateway");
    }
}
