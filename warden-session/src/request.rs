//! The inbound request as the session layer sees it.

use std::collections::HashMap;
use warden_csrf::CsrfRequest;

/// Request data the session lifecycle reads.
///
/// Header names are stored lowercased; lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Peer address as reported by the server or trusted proxy
    pub remote_addr: Option<String>,
    /// Whether the request arrived over an encrypted transport
    pub secure: bool,
}

impl SessionRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// A `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// A `POST` request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Append a cookie to the `Cookie` header.
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        let pair = format!("{name}={value}");
        self.headers
            .entry("cookie".to_string())
            .and_modify(|existing| {
                existing.push_str("; ");
                existing.push_str(&pair);
            })
            .or_insert(pair);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a urlencoded form body and its content type.
    pub fn with_form(self, fields: &[(&str, &str)]) -> Self {
        let body = serde_urlencoded::to_string(fields).unwrap_or_default();
        self.with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_user_agent(self, agent: impl Into<String>) -> Self {
        self.with_header("user-agent", agent)
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// Value of the first cookie called `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie")?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim().trim_matches('"'))
    }
}

impl CsrfRequest for SessionRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn header(&self, name: &str) -> Option<&str> {
        SessionRequest::header(self, name)
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let request = SessionRequest::get("/").with_header("User-Agent", "curl/8");
        assert_eq!(request.header("user-agent"), Some("curl/8"));
        assert_eq!(request.header("USER-AGENT"), Some("curl/8"));
        assert_eq!(request.user_agent(), Some("curl/8"));
    }

    #[test]
    fn test_cookie_parsing() {
        let request = SessionRequest::get("/")
            .with_cookie("lang", "de")
            .with_cookie("sid", "abc")
            .with_header("x-other", "1");

        assert_eq!(request.cookie("sid"), Some("abc"));
        assert_eq!(request.cookie("lang"), Some("de"));
        assert_eq!(request.cookie("missing"), None);
    }

    #[test]
    fn test_cookie_first_occurrence_wins() {
        let request = SessionRequest::get("/").with_header("Cookie", "sid=\"one\"; sid=two");
        assert_eq!(request.cookie("sid"), Some("one"));
    }

    #[test]
    fn test_form_body() {
        let request = SessionRequest::post("/login").with_form(&[("user", "a b")]);
        assert_eq!(request.body, b"user=a+b".to_vec());
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }
}
