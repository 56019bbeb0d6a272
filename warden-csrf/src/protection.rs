use crate::{config::CsrfConfig, error::CsrfError, token::CsrfToken};
use std::sync::Arc;

/// The parts of an inbound request CSRF validation needs.
pub trait CsrfRequest {
    /// HTTP method
    fn method(&self) -> &str;

    /// Request path
    fn path(&self) -> &str;

    /// Case-insensitive header lookup
    fn header(&self, name: &str) -> Option<&str>;

    /// Raw request body
    fn body(&self) -> &[u8];
}

/// Validates submitted tokens against the one held by the session.
#[derive(Clone)]
pub struct CsrfProtection {
    config: Arc<CsrfConfig>,
}

impl CsrfProtection {
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Check if request needs CSRF protection
    pub fn needs_protection(&self, request: &impl CsrfRequest) -> bool {
        if self.config.is_safe_method(request.method()) {
            return false;
        }

        let path = request.path();
        !self
            .config
            .exclude_paths
            .iter()
            .any(|excluded| path.starts_with(excluded.as_str()))
    }

    /// Render the hidden field for `token`.
    pub fn hidden_field(&self, token: &CsrfToken) -> String {
        token.hidden_field(&self.config.field_name)
    }

    /// Validate a submission against the session's token.
    ///
    /// `expected` is `None` when the session never issued a token for the
    /// current rotation epoch; that is a failure, not a pass.
    pub fn validate(
        &self,
        request: &impl CsrfRequest,
        expected: Option<&CsrfToken>,
    ) -> Result<(), CsrfError> {
        if !self.needs_protection(request) {
            return Ok(());
        }

        let submitted = self
            .submitted_token(request)
            .ok_or(CsrfError::MissingToken)?;

        let expected = expected.ok_or(CsrfError::NotIssued)?;

        if expected.matches(&submitted) {
            Ok(())
        } else {
            Err(CsrfError::InvalidToken)
        }
    }

    /// Extract the submitted token from the header or the body.
    pub fn submitted_token(&self, request: &impl CsrfRequest) -> Option<String> {
        request
            .header(&self.config.header_name)
            .map(str::to_string)
            .or_else(|| self.token_from_body(request.body()))
            .filter(|token| !token.is_empty())
    }

    fn token_from_body(&self, body: &[u8]) -> Option<String> {
        if body.is_empty() {
            return None;
        }

        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
            return json
                .get(&self.config.field_name)
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }

        serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
            .ok()?
            .into_iter()
            .find(|(key, _)| *key == self.config.field_name)
            .map(|(_, value)| value)
    }
}

impl Default for CsrfProtection {
    fn default() -> Self {
        Self::new(CsrfConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    struct FakeRequest {
        method: &'static str,
        path: &'static str,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    impl FakeRequest {
        fn new(method: &'static str, path: &'static str) -> Self {
            Self {
                method,
                path,
                headers: HashMap::new(),
                body: Vec::new(),
            }
        }
    }

    impl CsrfRequest for FakeRequest {
        fn method(&self) -> &str {
            self.method
        }

        fn path(&self) -> &str {
            self.path
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        fn body(&self) -> &[u8] {
            &self.body
        }
    }

    #[test]
    fn test_safe_methods() {
        let csrf = CsrfProtection::default();
        assert!(!csrf.needs_protection(&FakeRequest::new("GET", "/test")));
        assert!(csrf.needs_protection(&FakeRequest::new("POST", "/test")));
    }

    #[test]
    fn test_excluded_paths() {
        let csrf = CsrfProtection::new(
            CsrfConfig::default().with_exclude_paths(vec!["/hooks".to_string()]),
        );
        assert!(!csrf.needs_protection(&FakeRequest::new("POST", "/hooks/github")));
        assert!(csrf.needs_protection(&FakeRequest::new("POST", "/posting")));
    }

    #[test]
    fn test_form_body_token() {
        let csrf = CsrfProtection::default();
        let token = CsrfToken::generate(Utc::now());
        let mut req = FakeRequest::new("POST", "/post");
        req.body = format!("subject=hi&csrf_token={}", token.value).into_bytes();

        assert!(csrf.validate(&req, Some(&token)).is_ok());
    }

    #[test]
    fn test_json_body_token() {
        let csrf = CsrfProtection::default();
        let token = CsrfToken::generate(Utc::now());
        let mut req = FakeRequest::new("POST", "/post");
        req.body = serde_json::json!({ "csrf_token": token.value }).to_string().into_bytes();

        assert!(csrf.validate(&req, Some(&token)).is_ok());
    }

    #[test]
    fn test_header_token() {
        let csrf = CsrfProtection::default();
        let token = CsrfToken::generate(Utc::now());
        let mut req = FakeRequest::new("DELETE", "/post/1");
        req.headers.insert("x-csrf-token".to_string(), token.value.clone());

        assert!(csrf.validate(&req, Some(&token)).is_ok());
    }

    #[test]
    fn test_missing_and_mismatched() {
        let csrf = CsrfProtection::default();
        let token = CsrfToken::generate(Utc::now());

        let req = FakeRequest::new("POST", "/post");
        assert_eq!(csrf.validate(&req, Some(&token)), Err(CsrfError::MissingToken));

        let mut req = FakeRequest::new("POST", "/post");
        req.body = b"csrf_token=forged".to_vec();
        assert_eq!(csrf.validate(&req, Some(&token)), Err(CsrfError::InvalidToken));
        assert_eq!(csrf.validate(&req, None), Err(CsrfError::NotIssued));
    }

    #[test]
    fn test_safe_request_skips_validation() {
        let csrf = CsrfProtection::default();
        assert!(csrf.validate(&FakeRequest::new("GET", "/"), None).is_ok());
    }
}
