//! # Warden CSRF Protection
//!
//! Synchronizer-token CSRF protection bound to a session's rotation epoch.
//!
//! The token is stored server-side in the session payload and emitted into
//! pages as a hidden form field. A submission is accepted only when the
//! posted value equals the stored token; a missing token, a session that
//! never issued one, and a mismatch are all hard failures.
//!
//! ## Quick Start
//!
//! ```rust
//! use warden_csrf::{CsrfProtection, CsrfToken};
//!
//! let csrf = CsrfProtection::default();
//! let token = CsrfToken::generate(chrono::Utc::now());
//!
//! let field = csrf.hidden_field(&token);
//! assert!(field.contains(&token.value));
//! assert!(token.matches(&token.value.clone()));
//! ```

pub mod config;
pub mod error;
pub mod protection;
pub mod token;

pub use config::CsrfConfig;
pub use error::{CsrfError, Result};
pub use protection::{CsrfProtection, CsrfRequest};
pub use token::{CsrfToken, TOKEN_BYTES, constant_time_eq};
