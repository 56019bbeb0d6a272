//! Session identifiers.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// Bytes of entropy in a session id (256 bits).
pub const SESSION_ID_BYTES: usize = 32;

/// Length of an encoded session id.
pub const SESSION_ID_LEN: usize = 43;

/// Generate a new session id from the OS random source.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether a cookie value has the shape of an id this crate issued.
///
/// Values failing this check never reach a store.
pub fn is_well_formed(id: &str) -> bool {
    id.len() == SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
