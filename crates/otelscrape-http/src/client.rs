//! Request contract (§4.4): `request(source, method, url, headers, body,
//! query) -> (status, body_bytes)`, wrapped in the single global semaphore
//! and the TLS/response-size gates.
//!
//! Timeouts and the blocking-client-builder shape are grounded on
//! `tokf-cli`'s `remote/http.rs::build_client`; here the client is async
//! (`reqwest::Client`, not `reqwest::blocking::Client`) because the engine
//! fans out many units concurrently under the semaphores in §5.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use otelscrape_common::config::{BodyType, HttpMethod};
use otelscrape_common::{ErrorKind, ScrapeError};
use tokio::sync::Semaphore;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Implementation-defined response-size cap (§4.4): 16 MiB.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

pub struct HttpClient {
    inner: reqwest::Client,
    global: Arc<Semaphore>,
    enforce_tls: bool,
}

pub struct RequestSpec<'a> {
    pub source: &'a str,
    pub method: HttpMethod,
    pub url: String,
    pub headers: &'a HashMap<String, String>,
    pub query: &'a [(String, String)],
    /// `key=value` pairs appended to the URL verbatim (not percent-encoded),
    /// for APIs whose query keys carry reserved characters the normal
    /// urlencoded query serializer would escape (e.g. `created[gte]`).
    pub raw_query: &'a [(String, String)],
    pub body: Option<&'a serde_json::Value>,
    pub body_type: BodyType,
}

impl HttpClient {
    /// `max_global_concurrency` bounds the wire I/O semaphore shared by
    /// every source (§5).
    pub fn new(enforce_tls: bool, max_global_concurrency: usize) -> Result<Self, ScrapeError> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ScrapeError::with_cause("<http>", "init", ErrorKind::Network, e))?;
        Ok(Self {
            inner,
            global: Arc::new(Semaphore::new(max_global_concurrency.max(1))),
            enforce_tls,
        })
    }

    pub fn reqwest_client(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Issue one request under the global semaphore. Returns the response
    /// body as bytes on any status code — non-2xx is the caller's concern
    /// (response parsing layer maps it to `ErrorKind::Response`).
    pub async fn request(
        &self,
        spec: RequestSpec<'_>,
        auth: Option<&crate::auth::Authenticator>,
    ) -> Result<(reqwest::StatusCode, Vec<u8>), ScrapeError> {
        if self.enforce_tls && !spec.url.starts_with("https://") {
            return Err(ScrapeError::new(
                spec.source,
                "request",
                ErrorKind::Network,
                format!("plaintext request to `{}` rejected: enforceTls is set", spec.url),
            ));
        }

        let _permit = self
            .global
            .acquire()
            .await
            .map_err(|e| ScrapeError::with_cause(spec.source, "request", ErrorKind::Network, e))?;

        let url = append_raw_query(&spec.url, spec.raw_query);
        let mut builder = match spec.method {
            HttpMethod::Get => self.inner.get(&url),
            HttpMethod::Post => self.inner.post(&url),
        };
        builder = builder.query(spec.query);
        for (k, v) in spec.headers {
            builder = builder.header(k, v);
        }
        if let HttpMethod::Post = spec.method {
            if let Some(body) = spec.body {
                builder = match spec.body_type {
                    BodyType::Json => builder.json(body),
                    BodyType::Raw => builder.body(body.to_string()),
                };
            }
        }
        if let Some(auth) = auth {
            builder = auth.apply(&self.inner, builder).await?;
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ScrapeError::with_cause(spec.source, "request", ErrorKind::Network, e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScrapeError::with_cause(spec.source, "request", ErrorKind::Network, e))?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            tracing::warn!(source = spec.source, url = %url, bytes = bytes.len(), "response body exceeds the size cap; rejecting");
            return Err(ScrapeError::new(
                spec.source,
                "request",
                ErrorKind::Response,
                format!("response body of {} bytes exceeds the {} byte cap", bytes.len(), MAX_RESPONSE_BYTES),
            ));
        }
        tracing::debug!(source = spec.source, url = %url, status = status.as_u16(), bytes = bytes.len(), "request completed");
        Ok((status, bytes.to_vec()))
    }
}

/// Append `pairs` to `url` as a literal `key=value&...` query fragment,
/// without percent-encoding either side.
fn append_raw_query(url: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    let fragment: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{url}{sep}{}", fragment.join("&"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_request_returns_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": 1}])))
            .mount(&server)
            .await;

        let client = HttpClient::new(false, 8).unwrap();
        let headers = HashMap::new();
        let query = Vec::new();
        let spec = RequestSpec {
            source: "demo",
            method: HttpMethod::Get,
            url: format!("{}/posts", server.uri()),
            headers: &headers,
            query: &query,
            raw_query: &[],
            body: None,
            body_type: BodyType::Json,
        };
        let (status, body) = client.request(spec, None).await.unwrap();
        assert_eq!(status, reqwest::StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, serde_json::json!([{"id": 1}]));
    }

    #[tokio::test]
    async fn plaintext_rejected_when_tls_enforced() {
        let client = HttpClient::new(true, 4).unwrap();
        let headers = HashMap::new();
        let query = Vec::new();
        let spec = RequestSpec {
            source: "demo",
            method: HttpMethod::Get,
            url: "http://example.com/posts".to_string(),
            headers: &headers,
            query: &query,
            raw_query: &[],
            body: None,
            body_type: BodyType::Json,
        };
        let result = client.request(spec, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn global_semaphore_bounds_concurrency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = Arc::new(HttpClient::new(false, 2).unwrap());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let client = Arc::clone(&client);
            let uri = server.uri();
            handles.push(tokio::spawn(async move {
                let headers = HashMap::new();
                let query = Vec::new();
                let spec = RequestSpec {
                    source: "demo",
                    method: HttpMethod::Get,
                    url: uri,
                    headers: &headers,
                    query: &query,
                    raw_query: &[],
                    body: None,
                    body_type: BodyType::Json,
                };
                client.request(spec, None).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
    }
}
