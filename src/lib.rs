// Warden - Session and authentication lifecycle for Rust web services
//
// This library decides per request whether the caller is anonymous or a known
// identity, keeps sessions consistent across an ephemeral and a durable store,
// and binds CSRF tokens to each session's rotation epoch.

// Re-export the lifecycle crate
pub use warden_session::*;

// Re-export companion crates
pub use warden_csrf;
pub use warden_log;

pub use async_trait::async_trait;

// Prelude for common imports
pub mod prelude {
    pub use crate::async_trait;
    pub use warden_csrf::{CsrfConfig, CsrfError, CsrfProtection, CsrfToken};
    pub use warden_session::prelude::*;
    pub use warden_session::{
        ClientInfo, Clock, Cookie, ManualClock, ResponseCookieWriter, SessionRecord,
    };
}
