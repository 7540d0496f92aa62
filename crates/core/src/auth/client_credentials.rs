//! Client-credentials strategy for autonomous backend calls.
//!
//! The token endpoint is behind the [`TokenEndpoint`] trait and the wall
//! clock behind [`Clock`] so tests can count network calls and advance time
//! without sleeping.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{AccessToken, AuthError, AuthResult, CallContext, TokenStrategy};

/// Safety margin subtracted from `expires_in` to cover clock skew and
/// in-flight request latency.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Configuration for the client-credentials grant.
#[derive(Clone, Debug)]
pub struct ClientCredentialsConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// A granted token together with its advertised lifetime.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: u64,
}

/// The network edge of the client-credentials flow.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Post the `client_credentials` grant and return the token response.
    async fn request_token(&self) -> AuthResult<TokenGrant>;
}

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// reqwest-backed [`TokenEndpoint`] posting a form-encoded grant.
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
    config: ClientCredentialsConfig,
}

impl HttpTokenEndpoint {
    pub fn new(config: ClientCredentialsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(&self) -> AuthResult<TokenGrant> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint(format!(
                "token endpoint returned {status}"
            )));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

struct CachedToken {
    token: AccessToken,
    refresh_after: DateTime<Utc>,
}

/// Acquires and caches a service token via the `client_credentials` grant.
///
/// The cached token is treated as valid until `expires_in` minus a 60-second
/// margin has elapsed. The cache sits behind an async mutex held across the
/// endpoint call, so concurrent first-use results in exactly one network
/// call and every waiter receives the same token.
pub struct ClientCredentialsStrategy {
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsStrategy {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoint,
            clock,
            cache: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenStrategy for ClientCredentialsStrategy {
    fn can_handle(&self, _ctx: &CallContext) -> bool {
        // Fallback for any autonomous call; ordering in the resolver ensures
        // a delegated token wins when present.
        true
    }

    async fn acquire(&self, _ctx: &CallContext) -> AuthResult<AccessToken> {
        let mut cache = self.cache.lock().await;
        let now = self.clock.now();

        if let Some(cached) = cache.as_ref() {
            if now < cached.refresh_after {
                return Ok(cached.token.clone());
            }
        }

        let grant = self.endpoint.request_token().await?;
        let lifetime = Duration::seconds(grant.expires_in as i64 - TOKEN_EXPIRY_MARGIN_SECS);
        let token = AccessToken::new(grant.access_token);

        tracing::debug!(
            expires_in = grant.expires_in,
            "acquired service token via client_credentials grant"
        );

        *cache = Some(CachedToken {
            token: token.clone(),
            refresh_after: now + lifetime,
        });

        Ok(token)
    }
}
