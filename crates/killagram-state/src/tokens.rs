use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use killagram_crypto::keys::generate_nonce;
use killagram_crypto::signature::request_signature;
use killagram_crypto::token::{TokenClaims, TokenCodec, TokenKind};
use killagram_types::{CoreError, CoreResult};

use crate::accounts::Accounts;

/// Issues and verifies capability tokens bound to the account version.
///
/// Bumping the version is the only revocation mechanism: every token issued
/// before the bump fails [`TokenAuthority::verify`] afterwards.
pub struct TokenAuthority {
    codec: TokenCodec,
    secret: Vec<u8>,
    accounts: Arc<Accounts>,
}

impl TokenAuthority {
    pub fn new(secret: &[u8], accounts: Arc<Accounts>) -> Self {
        Self {
            codec: TokenCodec::new(secret),
            secret: secret.to_vec(),
            accounts,
        }
    }

    /// API token, 7 days. Creates the account if it does not exist yet.
    pub fn issue(&self, user: &str) -> CoreResult<String> {
        self.accounts.get(user);
        self.issue_with_ttl_at(user, TokenKind::Api, TokenKind::Api.ttl_secs(), Utc::now())
    }

    /// Realtime token, 60 seconds. No prior `issue` needed.
    pub fn issue_realtime(&self, user: &str) -> CoreResult<String> {
        self.issue_with_ttl_at(
            user,
            TokenKind::Realtime,
            TokenKind::Realtime.ttl_secs(),
            Utc::now(),
        )
    }

    pub fn issue_with_ttl_at(
        &self,
        user: &str,
        kind: TokenKind,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<String> {
        let claims = TokenClaims {
            sub: user.to_string(),
            kind,
            ver: self.accounts.version(user),
            exp: now.timestamp() + ttl_secs,
            nonce: generate_nonce(),
        };

        self.codec.encode(&claims).map_err(|e| {
            error!("Failed to sign token: {}", e);
            CoreError::Internal("token signing failed".into())
        })
    }

    pub fn verify(&self, token: &str, user: &str, kind: TokenKind) -> bool {
        self.verify_at(token, user, kind, Utc::now())
    }

    /// Fails closed. The caller only learns valid or not.
    pub fn verify_at(&self, token: &str, user: &str, kind: TokenKind, now: DateTime<Utc>) -> bool {
        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Token rejected: {}", e);
                return false;
            }
        };

        claims.sub == user
            && claims.kind == kind
            && claims.exp >= now.timestamp()
            && claims.ver == self.accounts.version(user)
    }

    /// Revoke every outstanding token of `user`.
    pub async fn bump_version(&self, user: &str) -> CoreResult<u64> {
        let version = self.accounts.bump_version(user).await?;
        debug!("Account {} now at token version {}", user, version);
        Ok(version)
    }

    /// Keyed signature of a request, for idempotency keys.
    pub fn sign_request(&self, method: &str, path: &str, body: &[u8]) -> CoreResult<String> {
        request_signature(&self.secret, method, path, body)
            .map_err(|e| CoreError::Internal(e.to_string()))
    }
}
