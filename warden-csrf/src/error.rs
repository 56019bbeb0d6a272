use thiserror::Error;

/// Reasons a submission failed CSRF validation.
///
/// The variants exist for logging; callers must present every one of them
/// to the client as the same rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("Invalid CSRF token")]
    InvalidToken,

    #[error("Missing CSRF token")]
    MissingToken,

    #[error("No CSRF token issued for this session")]
    NotIssued,
}

impl CsrfError {
    /// The message shown to the client, identical for every variant.
    pub fn user_message(&self) -> &'static str {
        "The form has expired. Please reload the page and try again."
    }
}

pub type Result<T> = std::result::Result<T, CsrfError>;
