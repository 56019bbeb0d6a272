use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Bytes of entropy in a token.
pub const TOKEN_BYTES: usize = 32;

/// CSRF token bound to one rotation epoch of a session.
///
/// The token lives in the session payload. It is rendered into forms as a
/// hidden field and never sent as a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    /// Random token value (base64url, no padding)
    pub value: String,

    /// When the token was issued
    pub issued_at: DateTime<Utc>,
}

impl CsrfToken {
    /// Generate a new token from the OS random source.
    pub fn generate(issued_at: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);

        Self {
            value: URL_SAFE_NO_PAD.encode(bytes),
            issued_at,
        }
    }

    /// Compare a submitted value against this token in constant time.
    pub fn matches(&self, submitted: &str) -> bool {
        constant_time_eq(self.value.as_bytes(), submitted.as_bytes())
    }

    /// Render the token as a hidden form field.
    pub fn hidden_field(&self, field_name: &str) -> String {
        format!(
            r#"<input type="hidden" name="{}" value="{}">"#,
            escape_attr(field_name),
            self.value
        )
    }
}

/// Constant-time byte comparison (prevent timing attacks)
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}
