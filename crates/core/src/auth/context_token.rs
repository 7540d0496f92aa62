//! Strategy for calls that already carry a delegated bearer token.

use async_trait::async_trait;

use super::{AccessToken, AuthError, AuthResult, CallContext, TokenStrategy};

/// Uses the token delivered inline with the inbound request (for example by a
/// decision-support hook). Acquisition is a zero-network lookup.
pub struct ContextTokenStrategy;

#[async_trait]
impl TokenStrategy for ContextTokenStrategy {
    fn can_handle(&self, ctx: &CallContext) -> bool {
        ctx.inbound_token.is_some()
    }

    async fn acquire(&self, ctx: &CallContext) -> AuthResult<AccessToken> {
        ctx.inbound_token
            .as_deref()
            .map(AccessToken::new)
            .ok_or(AuthError::MissingContextToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_only_contexts_with_a_token() {
        let strategy = ContextTokenStrategy;
        assert!(strategy.can_handle(&CallContext::with_token("t", "abc")));
        assert!(!strategy.can_handle(&CallContext::autonomous("t")));
    }

    #[tokio::test]
    async fn acquire_returns_the_inbound_token() {
        let strategy = ContextTokenStrategy;
        let token = strategy
            .acquire(&CallContext::with_token("t", "abc"))
            .await
            .expect("acquire");
        assert_eq!(token.as_str(), "abc");
    }
}
