//! Token acquisition for backend-to-backend calls.
//!
//! The external clinical API authenticates every call, but the orchestrator
//! runs under two different trust models: an inbound request may already
//! carry a delegated bearer token (placed into the call context by upstream
//! middleware), or the service acts autonomously and must obtain its own
//! token via a `client_credentials` grant. Each model is a
//! [`TokenStrategy`]; the [`TokenStrategyResolver`] picks the first strategy
//! able to handle the current context, so new auth modes are additive rather
//! than another branch in calling code.

mod client_credentials;
mod context_token;

pub use client_credentials::{
    ClientCredentialsConfig, ClientCredentialsStrategy, Clock, HttpTokenEndpoint, SystemClock,
    TokenEndpoint, TokenGrant, TOKEN_EXPIRY_MARGIN_SECS,
};
pub use context_token::ContextTokenStrategy;

use std::sync::Arc;

use async_trait::async_trait;

/// Errors raised while acquiring a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no token acquisition strategy can handle this call context")]
    NoStrategyAvailable,
    #[error("no inbound token present in the call context")]
    MissingContextToken,
    #[error("token endpoint call failed: {0}")]
    TokenEndpoint(String),
    #[error("token endpoint returned an invalid response: {0}")]
    InvalidResponse(String),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Per-call context carried from the inbound edge down to external calls.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    /// Practice/tenant identifier the call is scoped to.
    pub tenant_id: String,
    /// Bearer token delivered inline by upstream middleware, if any.
    pub inbound_token: Option<String>,
}

impl CallContext {
    /// Context for an autonomous backend call with no delegated token.
    pub fn autonomous(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            inbound_token: None,
        }
    }

    /// Context carrying a delegated inbound token.
    pub fn with_token(tenant_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            inbound_token: Some(token.into()),
        }
    }
}

/// A bearer token ready to be attached to an outbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// One way of obtaining a bearer token.
#[async_trait]
pub trait TokenStrategy: Send + Sync {
    /// Whether this strategy applies to the given call context.
    fn can_handle(&self, ctx: &CallContext) -> bool;

    /// Acquire a token for the given call context.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when acquisition fails; implementations never
    /// panic on expected failures such as an unreachable token endpoint.
    async fn acquire(&self, ctx: &CallContext) -> AuthResult<AccessToken>;
}

/// Ordered strategy list; the first strategy whose `can_handle` returns true
/// wins.
#[derive(Clone)]
pub struct TokenStrategyResolver {
    strategies: Vec<Arc<dyn TokenStrategy>>,
}

impl TokenStrategyResolver {
    pub fn new(strategies: Vec<Arc<dyn TokenStrategy>>) -> Self {
        Self { strategies }
    }

    /// Select the first strategy able to handle `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoStrategyAvailable`] when the list is empty or
    /// no strategy matches.
    pub fn resolve(&self, ctx: &CallContext) -> AuthResult<Arc<dyn TokenStrategy>> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(ctx))
            .cloned()
            .ok_or(AuthError::NoStrategyAvailable)
    }

    /// Resolve a strategy and acquire a token in one step.
    pub async fn acquire(&self, ctx: &CallContext) -> AuthResult<AccessToken> {
        self.resolve(ctx)?.acquire(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_resolver_yields_no_strategy_available() {
        let resolver = TokenStrategyResolver::new(vec![]);
        let err = resolver
            .acquire(&CallContext::autonomous("tenant-1"))
            .await
            .expect_err("should fail with no strategies");
        assert!(matches!(err, AuthError::NoStrategyAvailable));
    }

    #[tokio::test]
    async fn context_strategy_wins_when_token_present() {
        let resolver = TokenStrategyResolver::new(vec![Arc::new(ContextTokenStrategy)]);
        let ctx = CallContext::with_token("tenant-1", "inline-token");

        let token = resolver.acquire(&ctx).await.expect("acquire");
        assert_eq!(token.as_str(), "inline-token");
    }

    #[tokio::test]
    async fn no_strategy_matches_autonomous_context_without_fallback() {
        // Only the context strategy registered, but the call carries no token.
        let resolver = TokenStrategyResolver::new(vec![Arc::new(ContextTokenStrategy)]);
        let err = resolver
            .acquire(&CallContext::autonomous("tenant-1"))
            .await
            .expect_err("should not match");
        assert!(matches!(err, AuthError::NoStrategyAvailable));
    }
}
