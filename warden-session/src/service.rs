//! Process-wide session service.

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::deferred::WriteBehind;
use crate::ephemeral::EphemeralStore;
use crate::error::{GuardRejection, SessionError, SessionResult};
use crate::guard::RequestGuard;
use crate::identity::IdentityStore;
use crate::manager::SessionLifecycleManager;
use crate::policy::GracePolicy;
use crate::request::SessionRequest;
use crate::verifier::IdentityVerifier;
use std::sync::Arc;
use warden_csrf::{CsrfConfig, CsrfProtection};
use warden_log::{debug, info};

pub(crate) struct ServiceInner {
    pub(crate) config: SessionConfig,
    pub(crate) ephemeral: Arc<dyn EphemeralStore>,
    pub(crate) identity: Arc<dyn IdentityStore>,
    pub(crate) verifier: Arc<dyn IdentityVerifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) csrf: CsrfProtection,
    pub(crate) policy: GracePolicy,
    pub(crate) guard: RequestGuard,
    pub(crate) write_behind: WriteBehind,
}

/// Owns the stores, the verifier and the write-behind worker.
///
/// Cheap to clone; create one per process and call [`SessionService::begin`]
/// for every request.
#[derive(Clone)]
pub struct SessionService {
    pub(crate) inner: Arc<ServiceInner>,
}

impl SessionService {
    /// Create a service builder.
    pub fn builder(config: SessionConfig) -> SessionServiceBuilder {
        SessionServiceBuilder::new(config)
    }

    /// Connect to Redis and PostgreSQL as described by `config`.
    ///
    /// `config.database_url` must be set.
    #[cfg(all(feature = "redis", feature = "postgres"))]
    pub async fn connect(
        config: SessionConfig,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> SessionResult<Self> {
        let database_url = config
            .database_url
            .clone()
            .ok_or_else(|| SessionError::Config("database_url is required".into()))?;

        let ephemeral = crate::ephemeral::RedisEphemeralStore::new(config.clone()).await?;
        let identity = crate::identity::PgIdentityStore::new(&database_url, config.pool_size)?;

        Self::builder(config)
            .ephemeral(Arc::new(ephemeral))
            .identity(Arc::new(identity))
            .verifier(verifier)
            .build()
    }

    /// Validate a request and open its session lifecycle.
    ///
    /// Nothing touches a store until [`SessionLifecycleManager::resume`].
    pub fn begin(&self, request: SessionRequest) -> Result<SessionLifecycleManager, GuardRejection> {
        let client = self.inner.guard.check(&request)?;
        Ok(SessionLifecycleManager::new(self.clone(), request, client))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &GracePolicy {
        &self.inner.policy
    }

    pub fn csrf(&self) -> &CsrfProtection {
        &self.inner.csrf
    }

    /// Wait until every deferred write submitted so far has been applied.
    pub async fn flush(&self) {
        self.inner.write_behind.flush().await;
    }

    /// Apply outstanding deferred writes and stop the worker.
    pub async fn close(&self) {
        info!(target: "warden::session", "Closing session service");
        self.inner.write_behind.close().await;
    }
}

/// Builder for [`SessionService`].
pub struct SessionServiceBuilder {
    config: SessionConfig,
    ephemeral: Option<Arc<dyn EphemeralStore>>,
    identity: Option<Arc<dyn IdentityStore>>,
    verifier: Option<Arc<dyn IdentityVerifier>>,
    clock: Arc<dyn Clock>,
    csrf: CsrfConfig,
}

impl SessionServiceBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            ephemeral: None,
            identity: None,
            verifier: None,
            clock: Arc::new(SystemClock),
            csrf: CsrfConfig::default(),
        }
    }

    /// Set the ephemeral store
    pub fn ephemeral(mut self, store: Arc<dyn EphemeralStore>) -> Self {
        self.ephemeral = Some(store);
        self
    }

    /// Set the durable store
    pub fn identity(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(store);
        self
    }

    /// Set the identity verifier
    pub fn verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Replace the wall clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the CSRF field and header names
    pub fn csrf(mut self, csrf: CsrfConfig) -> Self {
        self.csrf = csrf;
        self
    }

    /// Build the service and spawn its write-behind worker.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> SessionResult<SessionService> {
        self.config.validate()?;

        let ephemeral = self
            .ephemeral
            .ok_or_else(|| SessionError::Config("an ephemeral store is required".into()))?;
        let identity = self
            .identity
            .ok_or_else(|| SessionError::Config("an identity store is required".into()))?;
        let verifier = self
            .verifier
            .ok_or_else(|| SessionError::Config("an identity verifier is required".into()))?;

        debug!(
            target: "warden::session",
            "Building session service (namespace {})",
            self.config.namespace
        );

        let write_behind = WriteBehind::spawn(identity.clone());

        Ok(SessionService {
            inner: Arc::new(ServiceInner {
                policy: GracePolicy::from_config(&self.config),
                config: self.config,
                ephemeral,
                identity,
                verifier,
                clock: self.clock,
                csrf: CsrfProtection::new(self.csrf),
                guard: RequestGuard::new(),
                write_behind,
            }),
        })
    }
}
