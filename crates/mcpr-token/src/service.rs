use mcpr_core::{
    generate_token_id, is_token_id, now_secs, redact_token_id, AuditEvent, Result, RouterError,
    TokenRecord,
};
use mcpr_keychain::SecretStore;
use mcpr_store::{AuditLog, TokenRepo};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_TTL_SECS: i64 = 86_400;
pub const MAX_TTL_SECS: i64 = 2_592_000;

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub client_id: String,
    pub name: String,
    pub ttl_secs: Option<i64>,
    pub scopes: Vec<String>,
    pub server_access: HashMap<String, bool>,
    pub metadata: Option<serde_json::Value>,
}

/// Result of `validate`: either a live token or the reason it is not.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub token: Option<TokenRecord>,
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn ok(token: TokenRecord) -> Self {
        Self {
            valid: true,
            token: Some(token),
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            token: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone)]
pub struct TokenService {
    repo: TokenRepo,
    secrets: Arc<dyn SecretStore>,
    audit: AuditLog,
}

impl TokenService {
    pub fn new(repo: TokenRepo, secrets: Arc<dyn SecretStore>, audit: AuditLog) -> Self {
        Self {
            repo,
            secrets,
            audit,
        }
    }

    /// Issue a token. TTLs above [`MAX_TTL_SECS`] are clamped with a
    /// warning, never rejected.
    pub async fn generate(&self, options: GenerateOptions) -> Result<TokenRecord> {
        self.run_blocking(move |this| this.generate_blocking(options))
            .await
    }

    /// Validate a bearer token id end to end: shape, keychain presence,
    /// expiry. Expired tokens are revoked on sight.
    pub async fn validate(&self, id: &str) -> Result<ValidationOutcome> {
        let id = id.to_string();
        self.run_blocking(move |this| this.validate_blocking(&id))
            .await
    }

    pub async fn revoke(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run_blocking(move |this| this.revoke_blocking(&id))
            .await
    }

    /// Extend a live token by its original TTL, measured from now.
    pub async fn refresh(&self, id: &str) -> Result<TokenRecord> {
        let id = id.to_string();
        self.run_blocking(move |this| this.refresh_blocking(&id))
            .await
    }

    /// Merge new pattern→allow pairs into the token's server access map.
    pub async fn update_server_access(
        &self,
        id: &str,
        patch: HashMap<String, bool>,
    ) -> Result<TokenRecord> {
        let id = id.to_string();
        self.run_blocking(move |this| this.update_server_access_blocking(&id, patch))
            .await
    }

    /// Drop expired metadata rows and their keychain entries; returns the
    /// number removed.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        self.run_blocking(move |this| this.cleanup_expired_blocking())
            .await
    }

    pub fn list(&self, client_id: Option<&str>) -> Result<Vec<TokenRecord>> {
        self.repo.list(client_id)
    }

    async fn run_blocking<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(TokenService) -> Result<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || operation(this))
            .await
            .map_err(RouterError::internal)?
    }

    fn generate_blocking(&self, options: GenerateOptions) -> Result<TokenRecord> {
        if options.client_id.trim().is_empty() {
            return Err(RouterError::validation("token clientId must not be empty"));
        }

        let requested = options.ttl_secs.unwrap_or(DEFAULT_TTL_SECS);
        if requested <= 0 {
            return Err(RouterError::validation("token ttl must be positive"));
        }
        let ttl = if requested > MAX_TTL_SECS {
            tracing::warn!(
                requested,
                max = MAX_TTL_SECS,
                "requested token ttl above cap, clamping"
            );
            MAX_TTL_SECS
        } else {
            requested
        };

        let now = now_secs();
        let token = TokenRecord {
            id: generate_token_id(),
            client_id: options.client_id,
            name: options.name,
            issued_at: now,
            expires_at: now + ttl,
            last_used_at: None,
            scopes: options.scopes,
            server_access: options.server_access,
            metadata: options.metadata,
        };

        // Keychain first: metadata without a secret is harmless, the
        // reverse is not.
        self.write_secret(&token)?;
        self.repo.upsert(&token)?;

        self.audit_token("token.create", &token.id, Some(&token.client_id), true);
        Ok(token)
    }

    fn validate_blocking(&self, id: &str) -> Result<ValidationOutcome> {
        if !is_token_id(id) {
            return Ok(ValidationOutcome::fail("Invalid token format"));
        }

        let Some(secret) = self.secrets.get(id)? else {
            return Ok(ValidationOutcome::fail("Token not found"));
        };
        let mut token: TokenRecord = serde_json::from_str(&secret)
            .map_err(|error| RouterError::Internal(format!("corrupt keychain entry: {error}")))?;

        let now = now_secs();
        if token.is_expired(now) {
            self.revoke_blocking(id)?;
            return Ok(ValidationOutcome::fail("Token expired"));
        }

        token.last_used_at = Some(now);
        self.write_secret(&token)?;
        self.repo.upsert(&token)?;

        self.audit_token("token.validate", id, Some(&token.client_id), true);
        Ok(ValidationOutcome::ok(token))
    }

    fn revoke_blocking(&self, id: &str) -> Result<()> {
        // Relational row first, then the secret: the keychain entry must
        // be the last thing standing.
        self.repo.delete(id)?;
        self.secrets.delete(id)?;
        self.audit_token("token.revoke", id, None, true);
        Ok(())
    }

    fn refresh_blocking(&self, id: &str) -> Result<TokenRecord> {
        let outcome = self.validate_blocking(id)?;
        let mut token = match outcome.token {
            Some(token) => token,
            None => {
                return Err(RouterError::unauthenticated(
                    outcome.error.unwrap_or_else(|| "invalid token".to_string()),
                ));
            }
        };

        let original_ttl = token.expires_at - token.issued_at;
        token.expires_at = now_secs() + original_ttl;
        self.write_secret(&token)?;
        self.repo.upsert(&token)?;
        Ok(token)
    }

    fn update_server_access_blocking(
        &self,
        id: &str,
        patch: HashMap<String, bool>,
    ) -> Result<TokenRecord> {
        let Some(secret) = self.secrets.get(id)? else {
            return Err(RouterError::not_found("token", redact_token_id(id)));
        };
        let mut token: TokenRecord = serde_json::from_str(&secret)
            .map_err(|error| RouterError::Internal(format!("corrupt keychain entry: {error}")))?;

        token.server_access.extend(patch);
        self.write_secret(&token)?;
        self.repo.upsert(&token)?;
        Ok(token)
    }

    fn cleanup_expired_blocking(&self) -> Result<usize> {
        let ids = self.repo.delete_expired(now_secs())?;
        for id in &ids {
            if let Err(error) = self.secrets.delete(id) {
                tracing::warn!(token = %redact_token_id(id), error = %error,
                    "failed to remove keychain entry for expired token");
            }
        }
        Ok(ids.len())
    }

    fn write_secret(&self, token: &TokenRecord) -> Result<()> {
        let serialized = serde_json::to_string(token).map_err(RouterError::internal)?;
        self.secrets.set(&token.id, &serialized)
    }

    fn audit_token(&self, event_type: &str, id: &str, client_id: Option<&str>, success: bool) {
        let event = AuditEvent {
            id: String::new(),
            event_type: event_type.to_string(),
            client_id: client_id.map(str::to_string),
            server_id: None,
            tool_name: None,
            success,
            duration_ms: None,
            metadata: serde_json::json!({"tokenId": redact_token_id(id)}),
            timestamp: 0,
        };
        if let Err(error) = self.audit.append(event) {
            tracing::warn!(error = %error, "audit write failed");
        }
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}
