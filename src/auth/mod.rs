//! Token verification contract (§1: "token-based authentication primitives
//! — only the verification contract is specified"). The RPC Server calls
//! [`TokenVerifier::verify`] from the `authenticate` method; production
//! wires [`StaticTokenVerifier`] from the `auth` config section, tests
//! substitute fakes, matching the capability-contract convention used by
//! the Device Manager (§9).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Role (§3 ClientConnection). Ordered `Viewer < Operator < Admin` so RBAC
/// checks (§4.9) are a single `role >= required` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn satisfies(&self, required: Role) -> bool {
        *self >= required
    }
}

impl std::str::FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::ConfigInvalid(format!("unknown role: {other}"))),
        }
    }
}

/// What a successful `authenticate` call populates onto the
/// `ClientConnection` (§3).
#[derive(Debug, Clone)]
pub struct AuthClaims {
    pub user_id: String,
    pub role: Role,
    pub auth_method: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthClaims>;
}

/// One entry of the `auth.tokens` config list: a bearer token mapped to a
/// user identity and role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: String,
    pub role: Role,
}

/// Production verifier: a fixed table of tokens loaded from config. Not
/// hot-reloadable on its own; new tokens require a config reload/restart,
/// consistent with the Config Provider's all-or-nothing reload model.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, AuthClaimsTemplate>,
}

struct AuthClaimsTemplate {
    user_id: String,
    role: Role,
}

impl StaticTokenVerifier {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|e| {
                (
                    e.token.clone(),
                    AuthClaimsTemplate {
                        user_id: e.user_id.clone(),
                        role: e.role,
                    },
                )
            })
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<AuthClaims> {
        if token.is_empty() {
            return Err(AppError::AuthRequired);
        }
        self.tokens
            .get(token)
            .map(|t| AuthClaims {
                user_id: t.user_id.clone(),
                role: t.role,
                auth_method: "static_token".to_string(),
            })
            .ok_or(AppError::AuthInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_matches_rbac_hierarchy() {
        assert!(Role::Admin.satisfies(Role::Operator));
        assert!(Role::Operator.satisfies(Role::Viewer));
        assert!(!Role::Viewer.satisfies(Role::Operator));
    }

    #[tokio::test]
    async fn verifies_known_token() {
        let verifier = StaticTokenVerifier::new(&[TokenEntry {
            token: "secret".to_string(),
            user_id: "alice".to_string(),
            role: Role::Operator,
        }]);
        let claims = verifier.verify("secret").await.unwrap();
        assert_eq!(claims.user_id, "alice");
        assert_eq!(claims.role, Role::Operator);
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        let verifier = StaticTokenVerifier::new(&[]);
        assert!(matches!(verifier.verify("nope").await, Err(AppError::AuthInvalid)));
    }

    #[tokio::test]
    async fn rejects_empty_token() {
        let verifier = StaticTokenVerifier::new(&[]);
        assert!(matches!(verifier.verify("").await, Err(AppError::AuthRequired)));
    }
}
