//! The per-request session state machine.
//!
//! A [`SessionLifecycleManager`] is created by [`SessionService::begin`] for
//! every request. It resolves the session cookie against the ephemeral tier
//! (falling back to the durable tier on a miss), applies the rotation and
//! grace rules, and at [`shutdown`](SessionLifecycleManager::shutdown) writes
//! the payload back and hands the queued durable writes to the write-behind
//! worker.
//!
//! Every store error is classified here. Application code only ever sees
//! [`SessionFailure`].

use crate::context::{SessionContext, SessionState};
use crate::cookie::ResponseCookieWriter;
use crate::deferred::{DeferredQueue, DeferredWrite};
use crate::ephemeral::LockToken;
use crate::error::{AuthFailure, SessionError, SessionFailure};
use crate::guard::ClientInfo;
use crate::id::{generate_session_id, is_well_formed};
use crate::identity::SessionRecord;
use crate::payload::{EphemeralEntry, EphemeralSession, RetireReason};
use crate::request::SessionRequest;
use crate::service::{ServiceInner, SessionService};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use warden_csrf::{CsrfError, CsrfToken};
use warden_log::{debug, error, info, trace, warn};

const TARGET: &str = "warden::session";
const SECURITY: &str = "warden::session::security";

/// Drives one request's session through resume, authentication, rotation,
/// destruction and the final flush.
pub struct SessionLifecycleManager {
    service: SessionService,
    request: SessionRequest,
    context: SessionContext,
    cookies: ResponseCookieWriter,
    deferred: DeferredQueue,
    locks: Vec<(String, LockToken)>,
    /// A live ephemeral entry exists under `context.id`
    stored: bool,
    resumed: bool,
    finished: bool,
}

impl SessionLifecycleManager {
    pub(crate) fn new(service: SessionService, request: SessionRequest, client: ClientInfo) -> Self {
        let now = service.inner.clock.now();
        let cookies = ResponseCookieWriter::new(&service.inner.config, request.secure);

        Self {
            context: SessionContext::anonymous(client, now),
            service,
            request,
            cookies,
            deferred: DeferredQueue::new(),
            locks: Vec::new(),
            stored: false,
            resumed: false,
            finished: false,
        }
    }

    fn inner(&self) -> Arc<ServiceInner> {
        self.service.inner.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.service.inner.clock.now()
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.context
    }

    pub fn state(&self) -> SessionState {
        self.context.state
    }

    pub fn request(&self) -> &SessionRequest {
        &self.request
    }

    pub fn service(&self) -> &SessionService {
        &self.service
    }

    /// Durable writes queued by this request.
    ///
    /// After [`shutdown`](Self::shutdown) this is what was handed to the
    /// write-behind worker.
    pub fn pending_writes(&self) -> &DeferredQueue {
        &self.deferred
    }

    /// Load the session named by the request cookie.
    ///
    /// Without a cookie the context stays anonymous and no store is touched.
    /// Calling it again returns the already resolved context.
    pub async fn resume(&mut self) -> Result<&SessionContext, SessionFailure> {
        if self.resumed {
            return Ok(&self.context);
        }
        self.resumed = true;

        let inner = self.inner();
        let Some(session_id) = self.request.cookie(&inner.config.cookie_name).map(str::to_string)
        else {
            trace!(target: TARGET, "No session cookie, staying anonymous");
            return Ok(&self.context);
        };

        if !is_well_formed(&session_id) {
            error!(
                target: SECURITY,
                "Malformed session cookie from {}",
                self.context.client.remote_address
            );
            self.cookies.clear_session();
            return Ok(&self.context);
        }

        self.acquire(&session_id).await?;

        let entry = inner
            .ephemeral
            .load(&session_id)
            .await
            .map_err(|e| unavailable("load", e))?;

        match entry {
            Some(EphemeralEntry::Live(payload)) => {
                let authenticated = payload.is_authenticated();
                let last_rotation = payload.last_rotation_timestamp;

                self.context.id = Some(session_id);
                self.context.payload = payload;
                self.context.cacheable = false;
                self.stored = true;

                if authenticated {
                    self.context.state = SessionState::Authenticated;
                    if inner.policy.needs_rotation(last_rotation, self.now()) {
                        debug!(target: TARGET, "Session id past regeneration grace, rotating");
                        self.rotate().await?;
                    }
                    self.ensure_csrf();
                } else {
                    self.context.state = SessionState::Active;
                }
            }
            Some(EphemeralEntry::Retired { retired_at, reason }) => {
                warn!(
                    target: SECURITY,
                    "Request from {} carried a session id retired at {}",
                    self.context.client.remote_address,
                    retired_at
                );
                // A rotated id has a successor the browser may already hold.
                if reason == RetireReason::Destroyed {
                    self.cookies.clear_session();
                }
            }
            None => self.recover(session_id).await?,
        }

        Ok(&self.context)
    }

    /// Rebuild a session missing from the ephemeral tier from its durable row.
    async fn recover(&mut self, session_id: String) -> Result<(), SessionFailure> {
        let inner = self.inner();

        let record = match inner.identity.find(&session_id).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    target: TARGET,
                    "Durable store lookup failed, continuing anonymously: {}",
                    e
                );
                return Ok(());
            }
        };

        let Some(record) = record else {
            error!(
                target: SECURITY,
                "Session cookie from {} matches no known session",
                self.context.client.remote_address
            );
            self.cookies.clear_session();
            return Ok(());
        };

        let identity = match inner.verifier.resolve(record.user_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                error!(
                    target: SECURITY,
                    "Durable session row references missing user {}",
                    record.user_id
                );
                self.deferred.push(DeferredWrite::DeleteSession(session_id));
                self.cookies.clear_session();
                return Ok(());
            }
            Err(e) => {
                error!(
                    target: TARGET,
                    "Identity lookup failed, continuing anonymously: {}",
                    e
                );
                return Ok(());
            }
        };

        info!(
            target: TARGET,
            "Recovering session of user {} from the durable store",
            identity.user_id
        );

        let mut payload = EphemeralSession::anonymous(record.created_at);
        payload.bind(&identity, record.created_at);

        self.context.id = Some(session_id);
        self.context.payload = payload;
        self.context.state = SessionState::Authenticated;
        self.context.cacheable = false;
        self.stored = false;

        // A miss for a known session is stale or suspicious: always rotate.
        self.rotate().await
    }

    /// Verify a credential and bind the session to the identity.
    ///
    /// On success the session moves to a fresh id; the previous id is
    /// retired, never reused. Returns `Ok(false)` for every rejection.
    pub async fn authenticate(
        &mut self,
        identifier: &str,
        credential: &str,
    ) -> Result<bool, SessionFailure> {
        if !self.resumed {
            self.resume().await?;
        }
        let inner = self.inner();

        let identity = match inner.verifier.verify(identifier, credential).await {
            Ok(identity) => identity,
            Err(AuthFailure) => {
                info!(
                    target: TARGET,
                    "Authentication failed from {}",
                    self.context.client.remote_address
                );
                return Ok(false);
            }
        };

        let now = self.now();
        let new_id = generate_session_id();

        let mut payload = EphemeralSession::anonymous(now);
        payload.bind(&identity, now);
        payload.csrf_token = Some(CsrfToken::generate(now));

        inner
            .ephemeral
            .store(&new_id, &EphemeralEntry::Live(payload.clone()), inner.config.ttl)
            .await
            .map_err(|e| unavailable("store", e))?;

        if let Some(previous) = self.context.id.take() {
            if self.context.is_authenticated() {
                self.deferred
                    .push(DeferredWrite::DeleteSession(previous.clone()));
                self.untrack(self.context.user_id(), &previous).await;
            }
            self.retire(&previous, now, RetireReason::Rotated).await;
        }
        self.track(identity.user_id, &new_id).await;

        self.deferred
            .push(DeferredWrite::InsertSession(SessionRecord {
                id: new_id.clone(),
                user_id: identity.user_id,
                created_at: now,
                remote_address: self.context.client.remote_address,
                user_agent: self.context.client.user_agent.clone(),
                last_seen_at: now,
            }));

        self.context.id = Some(new_id.clone());
        self.context.payload = payload;
        self.context.state = SessionState::Authenticated;
        self.context.cacheable = false;
        self.stored = true;
        self.cookies.set_session(&new_id);

        info!(target: TARGET, "User {} authenticated", identity.user_id);
        Ok(true)
    }

    /// Move the session to a new id, keeping its payload.
    ///
    /// Starts a new CSRF epoch. If the payload cannot be written under the
    /// new id the session is destroyed and `Expired` is returned. A request
    /// without a session has nothing to rotate.
    pub async fn regenerate(&mut self) -> Result<(), SessionFailure> {
        if !self.resumed {
            self.resume().await?;
        }
        self.rotate().await
    }

    async fn rotate(&mut self) -> Result<(), SessionFailure> {
        let Some(old_id) = self.context.id.clone() else {
            return Ok(());
        };

        let inner = self.inner();
        let now = self.now();
        let new_id = generate_session_id();

        let mut payload = self.context.payload.clone();
        payload.last_rotation_timestamp = now;
        payload.csrf_token = payload
            .is_authenticated()
            .then(|| CsrfToken::generate(now));

        if let Err(e) = inner
            .ephemeral
            .store(&new_id, &EphemeralEntry::Live(payload.clone()), inner.config.ttl)
            .await
        {
            error!(
                target: TARGET,
                "Could not write rotated session, destroying it: {}",
                e
            );
            self.discard(false).await;
            return Err(SessionFailure::Expired);
        }

        if payload.is_authenticated() {
            self.deferred.push(DeferredWrite::RenameSession {
                old: old_id.clone(),
                new: new_id.clone(),
            });
            self.untrack(payload.user_id, &old_id).await;
            self.track(payload.user_id, &new_id).await;
        }
        self.retire(&old_id, now, RetireReason::Rotated).await;

        self.context.id = Some(new_id.clone());
        self.context.payload = payload;
        self.context.cacheable = false;
        self.stored = true;
        self.cookies.set_session(&new_id);

        debug!(target: TARGET, "Session id rotated");
        Ok(())
    }

    /// End the session, or every session of the user when `all_sessions`.
    ///
    /// Always clears the cookie and leaves the context `Destroyed`, whatever
    /// the stores report.
    pub async fn destroy(&mut self, all_sessions: bool) {
        if !self.resumed
            && let Err(failure) = self.resume().await
        {
            warn!(target: TARGET, "Destroying without a resumed session: {}", failure);
        }
        self.discard(all_sessions).await;
    }

    async fn discard(&mut self, all_sessions: bool) {
        let inner = self.inner();
        let now = self.now();
        let user_id = self.context.user_id();
        let authenticated = self.context.is_authenticated();
        let current = self.context.id.clone();

        if authenticated && all_sessions {
            // Durable rows miss logins whose inserts are still queued; the
            // ephemeral index misses nothing that is live.
            let mut ids = BTreeSet::new();
            match inner.identity.list_for_user(user_id).await {
                Ok(records) => ids.extend(records.into_iter().map(|r| r.id)),
                Err(e) => error!(
                    target: TARGET,
                    "Could not list sessions of user {}: {}",
                    user_id,
                    e
                ),
            }
            match inner.ephemeral.tracked(user_id).await {
                Ok(tracked) => ids.extend(tracked),
                Err(e) => error!(
                    target: TARGET,
                    "Could not read session index of user {}: {}",
                    user_id,
                    e
                ),
            }

            for id in ids {
                if current.as_deref() != Some(id.as_str()) {
                    self.retire_foreign(&id, now).await;
                }
            }
            if let Err(e) = inner.ephemeral.forget(user_id).await {
                warn!(target: TARGET, "Could not drop session index: {}", e);
            }
            self.deferred.push(DeferredWrite::DeleteAllForUser(user_id));
        }

        if let Some(id) = current {
            if authenticated && !all_sessions {
                self.deferred.push(DeferredWrite::DeleteSession(id.clone()));
                self.untrack(user_id, &id).await;
            }
            self.retire(&id, now, RetireReason::Destroyed).await;
        }

        self.stored = false;
        self.context.reset(SessionState::Destroyed, now);
        self.context.cacheable = false;
        self.cookies.clear_session();

        if authenticated {
            info!(
                target: TARGET,
                "Destroyed {} of user {}",
                if all_sessions { "all sessions" } else { "session" },
                user_id
            );
        }
    }

    /// Flush the session at the end of the request.
    ///
    /// Empty sessions are removed, sessions with data are written back
    /// (extending their TTL) or started, locks are released and the queued
    /// durable writes are handed to the write-behind worker. Later calls are
    /// no-ops.
    pub async fn shutdown(&mut self) -> Result<(), SessionFailure> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let result = self.flush().await;
        self.release_locks().await;
        self.service.inner.write_behind.submit(self.deferred.clone());
        result
    }

    async fn flush(&mut self) -> Result<(), SessionFailure> {
        let inner = self.inner();
        let now = self.now();
        let ttl = inner.config.ttl;

        match self.context.id.clone() {
            Some(id) if self.stored => {
                if self.context.payload.is_empty() {
                    debug!(target: TARGET, "Removing empty session");
                    inner
                        .ephemeral
                        .remove(&id)
                        .await
                        .map_err(|e| unavailable("remove", e))?;
                    self.stored = false;
                    self.context.id = None;
                    self.cookies.clear_session();
                    return Ok(());
                }

                if self.context.is_authenticated() {
                    self.deferred.push(DeferredWrite::TouchAccess {
                        id: id.clone(),
                        at: now,
                    });
                    self.track(self.context.user_id(), &id).await;
                }

                inner
                    .ephemeral
                    .store(&id, &EphemeralEntry::Live(self.context.payload.clone()), ttl)
                    .await
                    .map_err(|e| unavailable("store", e))?;
            }
            _ => {
                if self.context.payload.is_empty() {
                    return Ok(());
                }

                let id = generate_session_id();
                inner
                    .ephemeral
                    .store(&id, &EphemeralEntry::Live(self.context.payload.clone()), ttl)
                    .await
                    .map_err(|e| unavailable("store", e))?;

                self.context.id = Some(id.clone());
                self.context.start();
                self.stored = true;
                self.cookies.set_session(&id);
                debug!(target: TARGET, "Started anonymous session");
            }
        }

        Ok(())
    }

    /// The CSRF token of the current epoch, issued on first use.
    ///
    /// Issuing a token to an anonymous request starts a session.
    pub fn csrf_token(&mut self) -> &CsrfToken {
        let now = self.now();
        self.context.start();
        self.context
            .payload
            .csrf_token
            .get_or_insert_with(|| CsrfToken::generate(now))
    }

    /// Hidden form field carrying the CSRF token.
    pub fn csrf_field(&mut self) -> String {
        let token = self.csrf_token().clone();
        self.service.inner.csrf.hidden_field(&token)
    }

    /// Check the request's submitted CSRF token against the session's.
    ///
    /// Safe methods pass. Call after [`resume`](Self::resume).
    pub fn validate_csrf(&self) -> Result<(), CsrfError> {
        let result = self
            .service
            .inner
            .csrf
            .validate(&self.request, self.context.csrf_token());

        if let Err(ref e) = result {
            warn!(
                target: SECURITY,
                "CSRF validation failed for {} {}: {}",
                self.request.method,
                self.request.path,
                e
            );
        }
        result
    }

    /// Whether the identity authenticated recently enough for a sensitive
    /// action. Evaluated against the clock on every call.
    pub fn permits_sensitive(&self) -> bool {
        self.context.is_authenticated()
            && self
                .service
                .inner
                .policy
                .permits_sensitive(self.context.authentication_timestamp(), self.now())
    }

    /// [`permits_sensitive`](Self::permits_sensitive) as a `Result`.
    pub fn require_recent_authentication(&self) -> Result<(), SessionFailure> {
        if self.permits_sensitive() {
            Ok(())
        } else {
            Err(SessionFailure::ReauthenticationRequired)
        }
    }

    /// Remember a language preference in the session and in its own cookie.
    pub fn set_language(&mut self, tag: &str) {
        self.context.payload.language = Some(tag.to_string());
        self.cookies.set_language(tag);
    }

    /// Queue a message for the user's next page.
    pub fn push_message(&mut self, message: impl Into<String>) {
        self.context.payload.messages.push(message.into());
        self.context.start();
    }

    /// Take the pending messages for display.
    pub fn take_messages(&mut self) -> Vec<String> {
        let messages = std::mem::take(&mut self.context.payload.messages);
        if !messages.is_empty() {
            self.context.cacheable = false;
        }
        messages
    }

    /// Cookies the response must carry.
    pub fn response_cookies(&self) -> &ResponseCookieWriter {
        &self.cookies
    }

    /// Whether the response may be served from a shared page cache.
    pub fn is_cacheable(&self) -> bool {
        self.context.is_cacheable() && self.cookies.is_empty()
    }

    /// Durable sessions of the authenticated user, most recent first.
    ///
    /// Empty for anonymous requests or when the durable store is down.
    pub async fn sessions_for_user(&self) -> Vec<SessionRecord> {
        if !self.context.is_authenticated() {
            return Vec::new();
        }

        match self
            .service
            .inner
            .identity
            .list_for_user(self.context.user_id())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(target: TARGET, "Could not list sessions: {}", e);
                Vec::new()
            }
        }
    }

    /// End another session of the authenticated user.
    ///
    /// Returns `false` when the id is the current session, unknown, or
    /// belongs to someone else.
    pub async fn revoke_session(&mut self, session_id: &str) -> bool {
        if !self.context.is_authenticated() || self.context.id() == Some(session_id) {
            return false;
        }

        let record = match self.service.inner.identity.find(session_id).await {
            Ok(record) => record,
            Err(e) => {
                error!(target: TARGET, "Could not look up session to revoke: {}", e);
                return false;
            }
        };

        match record {
            Some(record) if record.user_id == self.context.user_id() => {
                let now = self.now();
                self.retire_foreign(session_id, now).await;
                self.untrack(record.user_id, session_id).await;
                self.deferred
                    .push(DeferredWrite::DeleteSession(session_id.to_string()));
                info!(
                    target: TARGET,
                    "User {} revoked one of their sessions",
                    record.user_id
                );
                true
            }
            Some(_) => {
                warn!(
                    target: SECURITY,
                    "User {} tried to revoke a session of another user",
                    self.context.user_id()
                );
                false
            }
            None => false,
        }
    }

    async fn acquire(&mut self, session_id: &str) -> Result<(), SessionFailure> {
        let inner = self.inner();
        let config = &inner.config;

        match inner
            .ephemeral
            .lock(
                session_id,
                config.lock_ttl,
                config.lock_timeout,
                config.lock_retry_interval,
            )
            .await
        {
            Ok(Some(token)) => {
                self.locks.push((session_id.to_string(), token));
                Ok(())
            }
            Ok(None) => {
                warn!(target: TARGET, "Timed out waiting for the session lock");
                Err(SessionFailure::Contended)
            }
            Err(e) => Err(unavailable("lock", e)),
        }
    }

    async fn release_locks(&mut self) {
        let inner = self.inner();
        for (session_id, token) in self.locks.drain(..) {
            if let Err(e) = inner.ephemeral.unlock(&session_id, &token).await {
                warn!(target: TARGET, "Could not release session lock: {}", e);
            }
        }
    }

    /// Mark an id as no longer live so it resolves to an anonymous context.
    async fn retire(&self, session_id: &str, now: DateTime<Utc>, reason: RetireReason) {
        let inner = self.inner();
        let marker = EphemeralEntry::Retired {
            retired_at: now,
            reason,
        };

        if let Err(e) = inner
            .ephemeral
            .store(session_id, &marker, inner.config.retired_ttl)
            .await
        {
            warn!(target: TARGET, "Could not retire session id: {}", e);
            if let Err(e) = inner.ephemeral.remove(session_id).await {
                error!(target: TARGET, "Could not remove old session id: {}", e);
            }
        }
    }

    /// Retire an id another request may be using, under its lock.
    async fn retire_foreign(&self, session_id: &str, now: DateTime<Utc>) {
        let inner = self.inner();
        let config = &inner.config;

        let token = inner
            .ephemeral
            .lock(
                session_id,
                config.lock_ttl,
                config.lock_timeout,
                config.lock_retry_interval,
            )
            .await
            .unwrap_or(None);

        self.retire(session_id, now, RetireReason::Destroyed).await;

        if let Some(token) = token
            && let Err(e) = inner.ephemeral.unlock(session_id, &token).await
        {
            warn!(target: TARGET, "Could not release session lock: {}", e);
        }
    }

    async fn track(&self, user_id: i64, session_id: &str) {
        let inner = self.inner();
        if let Err(e) = inner
            .ephemeral
            .track(user_id, session_id, inner.config.ttl)
            .await
        {
            warn!(target: TARGET, "Could not index session of user {}: {}", user_id, e);
        }
    }

    async fn untrack(&self, user_id: i64, session_id: &str) {
        if let Err(e) = self.service.inner.ephemeral.untrack(user_id, session_id).await {
            warn!(target: TARGET, "Could not unindex session of user {}: {}", user_id, e);
        }
    }

    /// Issue a token to an authenticated context that has none.
    fn ensure_csrf(&mut self) {
        if self.context.is_authenticated() && self.context.payload.csrf_token.is_none() {
            let now = self.now();
            self.context.payload.csrf_token = Some(CsrfToken::generate(now));
        }
    }
}

impl Drop for SessionLifecycleManager {
    fn drop(&mut self) {
        if !self.finished && (!self.locks.is_empty() || !self.deferred.is_empty()) {
            warn!(
                target: TARGET,
                "Session manager dropped without shutdown ({} locks, {} deferred writes lost)",
                self.locks.len(),
                self.deferred.len()
            );
        }
    }
}

fn unavailable(operation: &str, e: SessionError) -> SessionFailure {
    error!(target: TARGET, "Ephemeral store {} failed: {}", operation, e);
    SessionFailure::StoreUnavailable
}
