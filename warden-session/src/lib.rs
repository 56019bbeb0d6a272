//! Session and authentication lifecycle for Warden.
//!
//! Decides per request whether the caller is anonymous or a known identity,
//! keeps that decision consistent across two storage tiers, rotates session
//! ids to defeat fixation and hijacking, and ties CSRF tokens to the
//! session's rotation epoch.
//!
//! # Storage tiers
//!
//! - **Ephemeral** ([`EphemeralStore`]): Redis (or memory) holding the live
//!   payload under the session id with a TTL. Source of truth for whether a
//!   session is active, and the per-session lock that serializes concurrent
//!   requests.
//! - **Durable** ([`IdentityStore`]): one PostgreSQL row per authenticated
//!   session. Used to recover sessions the ephemeral tier lost and to list
//!   or revoke a user's sessions. Written only through deferred commands
//!   applied after the response.
//!
//! # Features
//!
//! - `redis` - Redis ephemeral store (enabled by default)
//! - `postgres` - PostgreSQL durable store via diesel-async
//! - `full` - both
//!
//! # Request flow
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden_session::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let directory = MemoryCredentialDirectory::new();
//!     let verifier = PasswordIdentityVerifier::new(directory)?;
//!
//!     let service = SessionService::builder(SessionConfig::default())
//!         .ephemeral(Arc::new(MemoryEphemeralStore::new()))
//!         .identity(Arc::new(MemoryIdentityStore::new()))
//!         .verifier(Arc::new(verifier))
//!         .build()?;
//!
//!     let request = SessionRequest::post("/login")
//!         .with_remote_addr("203.0.113.7")
//!         .with_user_agent("Mozilla/5.0")
//!         .with_form(&[("csrf_token", "..."), ("user", "alice"), ("password", "...")]);
//!
//!     let Ok(mut session) = service.begin(request) else {
//!         // "must accept basic identification to proceed"
//!         return Ok(());
//!     };
//!
//!     if session.resume().await.is_err() {
//!         return Ok(()); // fatal: respond with 503
//!     }
//!     if session.validate_csrf().is_ok() {
//!         let _ = session.authenticate("alice", "secret").await;
//!     }
//!
//!     let _ = session.shutdown().await;
//!     for header in session.response_cookies().header_values() {
//!         println!("Set-Cookie: {header}");
//!     }
//!
//!     service.close().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod cookie;
pub mod deferred;
pub mod ephemeral;
pub mod error;
pub mod guard;
pub mod id;
pub mod identity;
pub mod manager;
pub mod payload;
pub mod policy;
pub mod request;
pub mod service;
pub mod verifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use context::{SessionContext, SessionState};
pub use cookie::{Cookie, ResponseCookieWriter, SameSite};
pub use deferred::{DeferredQueue, DeferredWrite, WriteBehind};
pub use ephemeral::{EphemeralStore, LockToken, MemoryEphemeralStore};
pub use error::{AuthFailure, GuardRejection, SessionError, SessionFailure, SessionResult};
pub use guard::{ClientInfo, RequestGuard};
pub use id::{generate_session_id, is_well_formed};
pub use identity::{IdentityStore, MIGRATION_SQL, MemoryIdentityStore, SessionRecord};
pub use manager::SessionLifecycleManager;
pub use payload::{ANONYMOUS_USER_ID, EphemeralEntry, EphemeralSession, RetireReason};
pub use policy::GracePolicy;
pub use request::SessionRequest;
pub use service::{SessionService, SessionServiceBuilder};
pub use verifier::{
    CredentialDirectory, Identity, IdentityVerifier, MemoryCredentialDirectory,
    PasswordIdentityVerifier, StoredCredential,
};

#[cfg(feature = "redis")]
pub use ephemeral::RedisEphemeralStore;

#[cfg(feature = "postgres")]
pub use identity::PgIdentityStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::context::{SessionContext, SessionState};
    pub use crate::ephemeral::{EphemeralStore, MemoryEphemeralStore};
    pub use crate::error::{AuthFailure, GuardRejection, SessionError, SessionFailure, SessionResult};
    pub use crate::identity::{IdentityStore, MemoryIdentityStore};
    pub use crate::manager::SessionLifecycleManager;
    pub use crate::request::SessionRequest;
    pub use crate::service::SessionService;
    pub use crate::verifier::{
        Identity, IdentityVerifier, MemoryCredentialDirectory, PasswordIdentityVerifier,
    };

    #[cfg(feature = "redis")]
    pub use crate::ephemeral::RedisEphemeralStore;

    #[cfg(feature = "postgres")]
    pub use crate::identity::PgIdentityStore;
}
