//! Pluggable auth strategies (§4.4) plus the token cache each of the two
//! network-fetching variants shares.
//!
//! The cache's `is_expired()` shape mirrors `tokf-cli`'s
//! `auth::credentials::LoadedAuth::is_expired` (a stored expiry of zero
//! means "unknown, never expired"); the single-flight coalescing on top of
//! it has no teacher counterpart, so it is built fresh from the ordering
//! guarantee in §4.4/§5 ("concurrent callers for the same source coalesce
//! onto a single in-flight token fetch").

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use otelscrape_common::config::{AuthConfig, AuthStrategy, HttpMethod};
use otelscrape_common::{ErrorKind, ScrapeError};
use tokio::sync::Mutex;

/// Bearer token cache expiry fallback when the token response carries no
/// `expires_in` (or the OAuth variant never expires by design).
const DEFAULT_TOKEN_TTL_SECS: i64 = 55 * 60;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// One per source. Holds the resolved strategy plus, for the two
/// network-fetching variants, a single-flight latch around the cached
/// token.
pub struct Authenticator {
    source_name: String,
    strategy: AuthStrategy,
    cached: Mutex<Option<CachedToken>>,
    /// Held across an in-flight fetch so concurrent callers await the same
    /// refresh instead of issuing duplicate requests (§4.4 ordering
    /// guarantee, §8 scenario 5).
    fetch_lock: Mutex<()>,
}

impl Authenticator {
    pub fn new(source_name: impl Into<String>, config: AuthConfig) -> Self {
        Self {
            source_name: source_name.into(),
            strategy: config.strategy,
            cached: Mutex::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Apply this source's auth to an outgoing request, fetching or
    /// refreshing the cached token first if needed.
    pub async fn apply(
        &self,
        client: &reqwest::Client,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ScrapeError> {
        match &self.strategy {
            AuthStrategy::None => Ok(builder),
            AuthStrategy::Basic { username_env, password_env } => {
                let user = read_env(&self.source_name, username_env)?;
                let pass = read_env(&self.source_name, password_env)?;
                Ok(builder.basic_auth(user, Some(pass)))
            }
            AuthStrategy::HeaderApiKey { header_name, value_env } => {
                let value = read_env(&self.source_name, value_env)?;
                Ok(builder.header(header_name, value))
            }
            AuthStrategy::OauthStatic { token_env } => {
                let token = read_env(&self.source_name, token_env)?;
                Ok(builder.bearer_auth(token))
            }
            AuthStrategy::OauthRuntime { .. } | AuthStrategy::AzureAd { .. } => {
                let token = self.token(client).await?;
                Ok(builder.bearer_auth(token))
            }
        }
    }

    /// Return a valid cached token, fetching (or waiting for an in-flight
    /// fetch) if absent or expired.
    async fn token(&self, client: &reqwest::Client) -> Result<String, ScrapeError> {
        let now = now_unix();
        if let Some(cached) = self.cached.lock().await.clone() {
            if !cached.is_expired(now) {
                return Ok(cached.value);
            }
        }

        // Only one caller performs the fetch; the rest block on this lock
        // and then re-check the cache, which the fetcher has by then filled.
        let _guard = self.fetch_lock.lock().await;
        let now = now_unix();
        if let Some(cached) = self.cached.lock().await.clone() {
            if !cached.is_expired(now) {
                return Ok(cached.value);
            }
        }

        let fetched = match &self.strategy {
            AuthStrategy::OauthRuntime { get_token_endpoint, method, headers, body, token_key } => {
                fetch_oauth_runtime(client, &self.source_name, get_token_endpoint, *method, headers, body, token_key)
                    .await?
            }
            AuthStrategy::AzureAd {
                tenant_token_endpoint,
                client_id_env,
                client_secret_env,
                resource,
            } => {
                fetch_azure_ad(
                    client,
                    &self.source_name,
                    tenant_token_endpoint,
                    client_id_env,
                    client_secret_env,
                    resource,
                )
                .await?
            }
            _ => unreachable!("token() only called for network-fetching strategies"),
        };

        tracing::debug!(source = %self.source_name, expires_at = fetched.expires_at, "fetched fresh auth token");
        *self.cached.lock().await = Some(fetched.clone());
        Ok(fetched.value)
    }
}

async fn fetch_oauth_runtime(
    client: &reqwest::Client,
    source: &str,
    endpoint: &str,
    method: HttpMethod,
    headers: &HashMap<String, String>,
    body: &HashMap<String, String>,
    token_key: &str,
) -> Result<CachedToken, ScrapeError> {
    let mut req = match method {
        HttpMethod::Get => client.get(endpoint),
        HttpMethod::Post => client.post(endpoint).form(body),
    };
    for (k, v) in headers {
        req = req.header(k, v);
    }
    let response = req
        .send()
        .await
        .map_err(|e| ScrapeError::with_cause(source, "auth", ErrorKind::Auth, e))?;
    parse_token_response(source, response, token_key).await
}

async fn fetch_azure_ad(
    client: &reqwest::Client,
    source: &str,
    tenant_token_endpoint: &str,
    client_id_env: &str,
    client_secret_env: &str,
    resource: &str,
) -> Result<CachedToken, ScrapeError> {
    let client_id = read_env(source, client_id_env)?;
    let client_secret = read_env(source, client_secret_env)?;
    let response = client
        .post(tenant_token_endpoint)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", &client_id),
            ("client_secret", &client_secret),
            ("resource", resource),
        ])
        .send()
        .await
        .map_err(|e| ScrapeError::with_cause(source, "auth", ErrorKind::Auth, e))?;
    parse_token_response(source, response, "access_token").await
}

async fn parse_token_response(
    source: &str,
    response: reqwest::Response,
    token_key: &str,
) -> Result<CachedToken, ScrapeError> {
    if !response.status().is_success() {
        return Err(ScrapeError::new(
            source,
            "auth",
            ErrorKind::Auth,
            format!("token endpoint returned {}", response.status()),
        ));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ScrapeError::with_cause(source, "auth", ErrorKind::Auth, e))?;

    let value = otelscrape_common::path::extract(token_key, &body)
        .and_then(|r| r.as_single().cloned())
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| ScrapeError::new(source, "auth", ErrorKind::Auth, format!("token response missing `{token_key}`")))?;

    let ttl = otelscrape_common::path::extract_f64("expires_in", &body)
        .map(|v| v as i64)
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

    Ok(CachedToken {
        value,
        expires_at: now_unix() + ttl,
    })
}

fn read_env(source: &str, name: &str) -> Result<String, ScrapeError> {
    std::env::var(name)
        .map_err(|_| ScrapeError::new(source, "auth", ErrorKind::Auth, format!("environment variable `{name}` is not set")))
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Basic-auth header value, exposed for tests that want to assert on the
/// header a `reqwest::RequestBuilder` would have sent without constructing
/// a live request.
pub fn basic_auth_header(user: &str, pass: &str) -> String {
    let raw = format!("{user}:{pass}");
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
}

pub type SharedAuthenticator = Arc<Authenticator>;
