//! Per-request projection of session state.

use crate::error::SessionResult;
use crate::guard::ClientInfo;
use crate::payload::EphemeralSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_csrf::CsrfToken;

/// Where a request's session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session
    Anonymous,
    /// A live unauthenticated session
    Active,
    /// A live session bound to an identity
    Authenticated,
    /// Destroyed during this request
    Destroyed,
}

/// Session data for one request.
///
/// Built by the lifecycle manager, owned by the request, discarded at the
/// end of it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub(crate) id: Option<String>,
    pub(crate) state: SessionState,
    pub(crate) payload: EphemeralSession,
    pub(crate) client: ClientInfo,
    pub(crate) cacheable: bool,
}

impl SessionContext {
    pub(crate) fn anonymous(client: ClientInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            state: SessionState::Anonymous,
            payload: EphemeralSession::anonymous(now),
            client,
            cacheable: true,
        }
    }

    /// Current session id, if the request has one.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a live session backs this request.
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active | SessionState::Authenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn user_id(&self) -> i64 {
        self.payload.user_id
    }

    /// Display name; the client address for anonymous callers.
    pub fn user_name(&self) -> String {
        match (&self.payload.user_name, self.is_authenticated()) {
            (Some(name), true) => name.clone(),
            _ => self.client.remote_address.to_string(),
        }
    }

    pub fn user_time_zone(&self) -> Option<&str> {
        self.payload.user_time_zone.as_deref()
    }

    pub fn user_avatar(&self) -> Option<&str> {
        self.payload.user_avatar_ref.as_deref()
    }

    /// Whether the bound identity has administrative rights.
    ///
    /// Read from this request's payload on every call.
    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.payload.is_admin
    }

    pub fn authentication_timestamp(&self) -> Option<DateTime<Utc>> {
        self.payload.authentication_timestamp
    }

    pub fn last_rotation_timestamp(&self) -> DateTime<Utc> {
        self.payload.last_rotation_timestamp
    }

    pub fn csrf_token(&self) -> Option<&CsrfToken> {
        self.payload.csrf_token.as_ref()
    }

    pub fn language(&self) -> Option<&str> {
        self.payload.language.as_deref()
    }

    /// Pending user-facing messages.
    pub fn messages(&self) -> &[String] {
        &self.payload.messages
    }

    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    pub fn payload(&self) -> &EphemeralSession {
        &self.payload
    }

    /// Get a value from the application data.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.payload.get(key)
    }

    /// Store application data. An anonymous request gains a session.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        self.payload.set(key, value)?;
        self.start();
        Ok(())
    }

    /// Remove application data.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.payload.remove(key)
    }

    /// Whether the response may be served from a shared page cache.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable && self.payload.messages.is_empty()
    }

    /// Move an anonymous or destroyed context to `Active`.
    pub(crate) fn start(&mut self) {
        if matches!(self.state, SessionState::Anonymous | SessionState::Destroyed) {
            self.state = SessionState::Active;
        }
        self.cacheable = false;
    }

    /// Replace everything with a fresh anonymous payload.
    pub(crate) fn reset(&mut self, state: SessionState, now: DateTime<Utc>) {
        self.id = None;
        self.state = state;
        self.payload = EphemeralSession::anonymous(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::Identity;

    fn context() -> SessionContext {
        let client = ClientInfo {
            remote_address: "198.51.100.20".parse().unwrap(),
            user_agent: "agent".to_string(),
        };
        SessionContext::anonymous(client, Utc::now())
    }

    #[test]
    fn test_anonymous_name_is_remote_address() {
        let context = context();
        assert_eq!(context.user_name(), "198.51.100.20");
        assert!(context.is_cacheable());
        assert!(!context.is_active());
    }

    #[test]
    fn test_data_starts_a_session() {
        let mut context = context();
        context.set("draft", "hello").unwrap();

        assert_eq!(context.state(), SessionState::Active);
        assert!(!context.is_cacheable());
        assert_eq!(context.get::<String>("draft").as_deref(), Some("hello"));
    }

    #[test]
    fn test_admin_flag_requires_authentication() {
        let mut context = context();
        let now = Utc::now();
        context
            .payload
            .bind(&Identity::new(3, "root").with_admin(true), now);
        assert!(!context.is_admin());

        context.state = SessionState::Authenticated;
        assert!(context.is_admin());
        assert_eq!(context.user_name(), "root");

        context.reset(SessionState::Destroyed, now);
        assert!(!context.is_admin());
        assert_eq!(context.user_id(), 0);
    }

    #[test]
    fn test_messages_make_response_uncacheable() {
        let mut context = context();
        context.payload.messages.push("Saved".to_string());
        assert!(!context.is_cacheable());
    }
}
