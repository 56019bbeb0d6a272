//! The live session payload held by the ephemeral tier.

use crate::error::{SessionError, SessionResult};
use crate::verifier::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_csrf::CsrfToken;

/// `user_id` of a session not bound to any identity.
pub const ANONYMOUS_USER_ID: i64 = 0;

/// Session payload stored under the session id.
///
/// Identity fields are `None` while `user_id == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralSession {
    /// When the bound identity authenticated
    pub authentication_timestamp: Option<DateTime<Utc>>,
    /// When the current id was issued
    pub last_rotation_timestamp: DateTime<Utc>,
    pub user_avatar_ref: Option<String>,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub user_time_zone: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    /// Token for the current rotation epoch
    pub csrf_token: Option<CsrfToken>,
    #[serde(default)]
    pub language: Option<String>,
    /// Transient user-facing messages
    #[serde(default)]
    pub messages: Vec<String>,
    /// Application state, e.g. pending form input
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl EphemeralSession {
    /// An unbound payload whose epoch starts at `now`.
    pub fn anonymous(now: DateTime<Utc>) -> Self {
        Self {
            authentication_timestamp: None,
            last_rotation_timestamp: now,
            user_avatar_ref: None,
            user_id: ANONYMOUS_USER_ID,
            user_name: None,
            user_time_zone: None,
            is_admin: false,
            csrf_token: None,
            language: None,
            messages: Vec::new(),
            data: BTreeMap::new(),
        }
    }

    /// Bind the payload to `identity`, authenticated at `authenticated_at`.
    pub fn bind(&mut self, identity: &Identity, authenticated_at: DateTime<Utc>) {
        self.authentication_timestamp = Some(authenticated_at);
        self.user_id = identity.user_id;
        self.user_name = Some(identity.user_name.clone());
        self.user_time_zone = identity.time_zone.clone();
        self.user_avatar_ref = identity.avatar.clone();
        self.is_admin = identity.is_admin;
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id != ANONYMOUS_USER_ID
    }

    /// Whether there is nothing worth keeping a session for.
    pub fn is_empty(&self) -> bool {
        !self.is_authenticated()
            && self.csrf_token.is_none()
            && self.messages.is_empty()
            && self.data.is_empty()
    }

    /// Get a value from the application data.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in the application data.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        let json_value =
            serde_json::to_value(value).map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.data.insert(key.to_string(), json_value);
        Ok(())
    }

    /// Remove a value from the application data.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }
}

/// What the ephemeral tier holds under a session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EphemeralEntry {
    /// A live session.
    Live(EphemeralSession),
    /// The id was rotated away or ended; resuming it yields an anonymous
    /// context.
    Retired {
        retired_at: DateTime<Utc>,
        #[serde(default)]
        reason: RetireReason,
    },
}

/// Why an id stopped being live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    /// Replaced by a successor id the browser may already hold.
    #[default]
    Rotated,
    /// Logged out or revoked; there is no successor.
    Destroyed,
}

impl EphemeralEntry {
    pub fn to_json(&self) -> SessionResult<String> {
        serde_json::to_string(self).map_err(|e| SessionError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> SessionResult<Self> {
        serde_json::from_str(json).map_err(|e| SessionError::Deserialization(e.to_string()))
    }
}
