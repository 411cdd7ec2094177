//! Authentication plus per-server authorization on top of the token
//! service. Fail-closed: once a token carries any explicit server
//! permission, everything unmatched is denied.

use mcpr_core::{matches_pattern, Result, RouterError, TokenRecord};
use std::collections::HashMap;

use crate::service::TokenService;

#[derive(Clone)]
pub struct TokenValidator {
    service: TokenService,
}

impl TokenValidator {
    pub fn new(service: TokenService) -> Self {
        Self { service }
    }

    /// Authenticate a bearer token, mapping every failure mode to
    /// `unauthenticated`.
    pub async fn validate(&self, token_id: &str) -> Result<TokenRecord> {
        let outcome = self.service.validate(token_id).await?;
        match outcome.token {
            Some(token) if outcome.valid => Ok(token),
            _ => Err(RouterError::unauthenticated(
                outcome.error.unwrap_or_else(|| "invalid token".to_string()),
            )),
        }
    }

    /// Authenticate, then check the token may touch `server_id`.
    pub async fn validate_for_server(
        &self,
        token_id: &str,
        server_id: &str,
    ) -> Result<TokenRecord> {
        let token = self.validate(token_id).await?;
        if check_server_access(&token.server_access, server_id) {
            Ok(token)
        } else {
            Err(RouterError::forbidden(format!(
                "token is not permitted to use server '{server_id}'"
            )))
        }
    }
}

/// Decide whether `server_access` admits `server_id`.
///
/// Order matters: explicit denials (exact, then wildcard) are checked
/// before any allow, and a non-empty map with no match denies.
pub fn check_server_access(server_access: &HashMap<String, bool>, server_id: &str) -> bool {
    if server_access.is_empty() {
        return true;
    }

    if server_access.get(server_id) == Some(&false) {
        return false;
    }
    for (pattern, allow) in server_access {
        if !allow && pattern.contains('*') && matches_pattern(pattern, server_id) {
            return false;
        }
    }

    if server_access.get(server_id) == Some(&true) {
        return true;
    }
    for (pattern, allow) in server_access {
        if *allow && pattern.contains('*') && matches_pattern(pattern, server_id) {
            return true;
        }
    }

    false
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::GenerateOptions;
    use mcpr_keychain::MemorySecretStore;
    use mcpr_store::Store;
    use std::sync::Arc;

    fn access(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs
            .iter()
            .map(|(pattern, allow)| ((*pattern).to_string(), *allow))
            .collect()
    }

    #[test]
    fn test_empty_access_is_permissive() {
        assert!(check_server_access(&HashMap::new(), "server-anything"));
    }

    #[test]
    fn test_exact_deny_wins() {
        let map = access(&[("server-1", false), ("*", true)]);
        assert!(!check_server_access(&map, "server-1"));
        assert!(check_server_access(&map, "server-2"));
    }

    #[test]
    fn test_wildcard_deny_beats_exact_allow() {
        // Spec order: wildcard denials are checked before exact allows.
        let map = access(&[("server-*", false), ("server-1", true)]);
        assert!(!check_server_access(&map, "server-1"));
    }

    #[test]
    fn test_exact_allow() {
        let map = access(&[("server-1", true)]);
        assert!(check_server_access(&map, "server-1"));
        // Fail closed: explicit permissions exist, nothing matches.
        assert!(!check_server_access(&map, "server-2"));
    }

    #[test]
    fn test_wildcard_allow() {
        let map = access(&[("prod-*", true)]);
        assert!(check_server_access(&map, "prod-db"));
        assert!(!check_server_access(&map, "staging-db"));
    }

    #[tokio::test]
    async fn test_validator_maps_failures_to_unauthenticated() {
        let store = Store::open_in_memory().unwrap();
        let service = TokenService::new(
            store.tokens(),
            Arc::new(MemorySecretStore::new()),
            store.audit(),
        );
        let validator = TokenValidator::new(service.clone());

        let err = validator.validate("garbage").await.unwrap_err();
        assert_eq!(err.kind(), mcpr_core::ErrorKind::Unauthenticated);

        let token = service
            .generate(GenerateOptions {
                client_id: "alice".to_string(),
                name: "t".to_string(),
                ttl_secs: None,
                scopes: vec![],
                server_access: HashMap::from([("server-1".to_string(), true)]),
                metadata: None,
            })
            .await
            .unwrap();

        assert!(validator.validate(&token.id).await.is_ok());
        assert!(validator
            .validate_for_server(&token.id, "server-1")
            .await
            .is_ok());

        let err = validator
            .validate_for_server(&token.id, "server-2")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), mcpr_core::ErrorKind::Forbidden);
    }
}
