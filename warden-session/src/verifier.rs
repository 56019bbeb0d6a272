//! Identity verification.
//!
//! The lifecycle manager treats verification as an external collaborator:
//! it hands over an identifier and a credential and receives either an
//! [`Identity`] or the single [`AuthFailure`] value.

use crate::error::{AuthFailure, SessionError, SessionResult};
use argon2::{
    Argon2, Params,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use warden_log::error;

/// A verified identity and the display fields a session copies from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub user_name: String,
    pub time_zone: Option<String>,
    pub avatar: Option<String>,
    pub is_admin: bool,
}

impl Identity {
    pub fn new(user_id: i64, user_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            time_zone: None,
            avatar: None,
            is_admin: false,
        }
    }

    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }
}

/// Verifies credentials and resolves user ids back to identities.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential.
    ///
    /// Implementations must take the same time and return the same value
    /// whether the identifier is unknown or the credential is wrong.
    async fn verify(&self, identifier: &str, credential: &str) -> Result<Identity, AuthFailure>;

    /// Look up the identity a durable session row points at.
    ///
    /// `Ok(None)` means the reference dangles (the account is gone).
    async fn resolve(&self, user_id: i64) -> SessionResult<Option<Identity>>;
}

/// A stored password credential.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub identity: Identity,
    /// Argon2 PHC string
    pub password_hash: String,
    pub active: bool,
}

/// Account lookup used by [`PasswordIdentityVerifier`].
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    async fn find_by_identifier(&self, identifier: &str) -> SessionResult<Option<StoredCredential>>;

    async fn find_by_user_id(&self, user_id: i64) -> SessionResult<Option<Identity>>;
}

/// Verifies argon2 password hashes from a [`CredentialDirectory`].
///
/// Unknown identifiers are checked against a dummy hash built with the same
/// parameters, so both failure paths do the same work.
pub struct PasswordIdentityVerifier<D> {
    directory: D,
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl<D: CredentialDirectory> PasswordIdentityVerifier<D> {
    /// Create a verifier with the default argon2id parameters.
    pub fn new(directory: D) -> SessionResult<Self> {
        Self::with_params(directory, Params::default())
    }

    /// Create a verifier with explicit argon2id parameters.
    pub fn with_params(directory: D, params: Params) -> SessionResult<Self> {
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        let dummy_hash = hash_with(&argon2, "warden-dummy-credential")?;

        Ok(Self {
            directory,
            argon2,
            dummy_hash,
        })
    }

    /// Hash a password with this verifier's parameters.
    pub fn hash_password(&self, password: &str) -> SessionResult<String> {
        hash_with(&self.argon2, password)
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    async fn check(&self, hash: String, credential: &str) -> bool {
        let argon2 = self.argon2.clone();
        let credential = credential.to_string();

        tokio::task::spawn_blocking(move || {
            PasswordHash::new(&hash)
                .map(|parsed| argon2.verify_password(credential.as_bytes(), &parsed).is_ok())
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false)
    }
}

fn hash_with(argon2: &Argon2<'static>, password: &str) -> SessionResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SessionError::Other(format!("password hashing failed: {e}")))
}

#[async_trait]
impl<D: CredentialDirectory> IdentityVerifier for PasswordIdentityVerifier<D> {
    async fn verify(&self, identifier: &str, credential: &str) -> Result<Identity, AuthFailure> {
        let stored = match self.directory.find_by_identifier(identifier).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(target: "warden::session", "Credential directory lookup failed: {}", e);
                None
            }
        };

        match stored {
            Some(stored) => {
                let valid = self.check(stored.password_hash, credential).await;
                if valid && stored.active {
                    Ok(stored.identity)
                } else {
                    Err(AuthFailure)
                }
            }
            None => {
                let _ = self.check(self.dummy_hash.clone(), credential).await;
                Err(AuthFailure)
            }
        }
    }

    async fn resolve(&self, user_id: i64) -> SessionResult<Option<Identity>> {
        self.directory.find_by_user_id(user_id).await
    }
}

/// Credential directory kept in process memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryCredentialDirectory {
    by_identifier: Arc<RwLock<HashMap<String, StoredCredential>>>,
}

impl MemoryCredentialDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account under a case-insensitive identifier.
    pub async fn add(&self, identifier: &str, identity: Identity, password_hash: String) {
        self.by_identifier.write().await.insert(
            identifier.to_lowercase(),
            StoredCredential {
                identity,
                password_hash,
                active: true,
            },
        );
    }

    /// Mark an account inactive.
    pub async fn deactivate(&self, identifier: &str) {
        if let Some(stored) = self
            .by_identifier
            .write()
            .await
            .get_mut(&identifier.to_lowercase())
        {
            stored.active = false;
        }
    }

    /// Delete an account.
    pub async fn delete_user(&self, user_id: i64) {
        self.by_identifier
            .write()
            .await
            .retain(|_, stored| stored.identity.user_id != user_id);
    }
}

#[async_trait]
impl CredentialDirectory for MemoryCredentialDirectory {
    async fn find_by_identifier(&self, identifier: &str) -> SessionResult<Option<StoredCredential>> {
        Ok(self
            .by_identifier
            .read()
            .await
            .get(&identifier.to_lowercase())
            .cloned())
    }

    async fn find_by_user_id(&self, user_id: i64) -> SessionResult<Option<Identity>> {
        Ok(self
            .by_identifier
            .read()
            .await
            .values()
            .find(|stored| stored.identity.user_id == user_id)
            .map(|stored| stored.identity.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_params() -> Params {
        Params::new(1024, 1, 1, None).unwrap()
    }

    async fn verifier() -> PasswordIdentityVerifier<MemoryCredentialDirectory> {
        let directory = MemoryCredentialDirectory::new();
        let verifier =
            PasswordIdentityVerifier::with_params(directory.clone(), cheap_params()).unwrap();
        let hash = verifier.hash_password("correct horse").unwrap();
        directory
            .add("Alice", Identity::new(7, "alice").with_time_zone("UTC"), hash)
            .await;
        verifier
    }

    #[tokio::test]
    async fn test_valid_credential() {
        let verifier = verifier().await;
        let identity = verifier.verify("alice", "correct horse").await.unwrap();
        assert_eq!(identity.user_id, 7);
        assert_eq!(identity.time_zone.as_deref(), Some("UTC"));
    }

    #[tokio::test]
    async fn test_unknown_and_wrong_are_indistinguishable() {
        let verifier = verifier().await;
        let wrong = verifier.verify("alice", "battery staple").await;
        let unknown = verifier.verify("mallory", "correct horse").await;
        assert_eq!(wrong, unknown);
        assert_eq!(wrong, Err(AuthFailure));
    }

    #[tokio::test]
    async fn test_inactive_account_rejected() {
        let verifier = verifier().await;
        verifier.directory().deactivate("alice").await;
        assert_eq!(
            verifier.verify("alice", "correct horse").await,
            Err(AuthFailure)
        );
    }

    #[tokio::test]
    async fn test_resolve() {
        let verifier = verifier().await;
        assert_eq!(verifier.resolve(7).await.unwrap().unwrap().user_name, "alice");

        verifier.directory().delete_user(7).await;
        assert!(verifier.resolve(7).await.unwrap().is_none());
    }

    #[test]
    fn test_hashes_are_salted() {
        let verifier =
            PasswordIdentityVerifier::with_params(MemoryCredentialDirectory::new(), cheap_params())
                .unwrap();
        let a = verifier.hash_password("same").unwrap();
        let b = verifier.hash_password("same").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
    }
}
