//! Response cookies emitted by lifecycle transitions.

use crate::config::SessionConfig;
use std::fmt;

/// Cookie SameSite attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A `Set-Cookie` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    /// Seconds; `Some(0)` deletes the cookie
    pub max_age: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Cookie {
    /// Whether this cookie tells the browser to delete it.
    pub fn is_removal(&self) -> bool {
        self.max_age == Some(0)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;

        if let Some(ref domain) = self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age)?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }

        write!(f, "; SameSite={}", self.same_site.as_str())
    }
}

/// Collects the cookies a response must carry.
///
/// Writing a cookie name twice keeps only the later value, so a response
/// never carries two session cookies.
#[derive(Debug, Clone)]
pub struct ResponseCookieWriter {
    session_name: String,
    language_name: String,
    language_ttl: u64,
    path: String,
    domain: Option<String>,
    secure: bool,
    cookies: Vec<Cookie>,
}

impl ResponseCookieWriter {
    /// `secure` is whether the request arrived over an encrypted transport.
    pub fn new(config: &SessionConfig, secure: bool) -> Self {
        Self {
            session_name: config.cookie_name.clone(),
            language_name: config.language_cookie_name.clone(),
            language_ttl: config.language_cookie_ttl.as_secs(),
            path: config.cookie_path.clone(),
            domain: config.cookie_domain.clone(),
            secure,
            cookies: Vec::new(),
        }
    }

    /// Issue the session cookie for `session_id`.
    ///
    /// The cookie has no `Max-Age` and lasts for the browser session.
    pub fn set_session(&mut self, session_id: &str) {
        let cookie = self.cookie(&self.session_name, session_id, None, true);
        self.put(cookie);
    }

    /// Tell the browser to drop the session cookie.
    pub fn clear_session(&mut self) {
        let cookie = self.cookie(&self.session_name, "", Some(0), true);
        self.put(cookie);
    }

    /// Issue the language preference cookie. It is readable by scripts.
    pub fn set_language(&mut self, tag: &str) {
        let cookie = self.cookie(&self.language_name, tag, Some(self.language_ttl), false);
        self.put(cookie);
    }

    /// The pending session cookie, if a transition wrote one.
    pub fn session_cookie(&self) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == self.session_name)
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Rendered `Set-Cookie` header values.
    pub fn header_values(&self) -> Vec<String> {
        self.cookies.iter().map(Cookie::to_string).collect()
    }

    fn cookie(&self, name: &str, value: &str, max_age: Option<u64>, http_only: bool) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            path: self.path.clone(),
            domain: self.domain.clone(),
            max_age,
            secure: self.secure,
            http_only,
            same_site: SameSite::Lax,
        }
    }

    fn put(&mut self, cookie: Cookie) {
        self.cookies.retain(|existing| existing.name != cookie.name);
        self.cookies.push(cookie);
    }
}
