//! Session configuration.

use crate::error::{SessionError, SessionResult};
use std::env;
use std::time::Duration;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ephemeral store connection URL
    pub redis_url: String,
    /// Key prefix in the ephemeral store
    pub namespace: String,
    /// Durable store connection URL
    pub database_url: Option<String>,
    /// Durable store pool size
    pub pool_size: usize,
    /// Ephemeral entry TTL (session garbage-collection horizon)
    pub ttl: Duration,
    /// Window after authentication during which sensitive actions are allowed
    pub protection_grace: Duration,
    /// Age after which the next resume rotates the session id
    pub regeneration_grace: Duration,
    /// Lifetime of a per-session lock if its holder never releases it
    pub lock_ttl: Duration,
    /// How long a request waits for a contended session lock
    pub lock_timeout: Duration,
    /// Pause between lock attempts
    pub lock_retry_interval: Duration,
    /// How long a rotated-away id stays marked retired
    pub retired_ttl: Duration,
    /// Session cookie name
    pub cookie_name: String,
    /// Cookie domain; host-only when `None`
    pub cookie_domain: Option<String>,
    /// Cookie path
    pub cookie_path: String,
    /// Language preference cookie name
    pub language_cookie_name: String,
    /// Language preference cookie lifetime
    pub language_cookie_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            namespace: "warden:session".to_string(),
            database_url: None,
            pool_size: 10,
            ttl: Duration::from_secs(1440),
            protection_grace: Duration::from_secs(3600),
            regeneration_grace: Duration::from_secs(1200),
            lock_ttl: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(25),
            retired_ttl: Duration::from_secs(300),
            cookie_name: "sid".to_string(),
            cookie_domain: None,
            cookie_path: "/".to_string(),
            language_cookie_name: "lang".to_string(),
            language_cookie_ttl: Duration::from_secs(86400 * 365),
        }
    }
}

impl SessionConfig {
    /// Create a configuration backed by Redis.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_session::SessionConfig;
    ///
    /// let config = SessionConfig::redis("redis://localhost:6379").unwrap();
    /// assert_eq!(config.session_key("abc"), "warden:session:abc");
    /// ```
    pub fn redis(url: &str) -> SessionResult<Self> {
        check_redis_url(url)?;

        Ok(Self {
            redis_url: url.to_string(),
            ..Default::default()
        })
    }

    /// Build a configuration from `WARDEN_SESSION_*` environment variables.
    ///
    /// Durations are whole seconds. Unset variables keep their defaults.
    pub fn from_env() -> SessionResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("WARDEN_SESSION_REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(namespace) = env::var("WARDEN_SESSION_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(url) = env::var("WARDEN_SESSION_DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Some(size) = env_number("WARDEN_SESSION_POOL_SIZE")? {
            config.pool_size = size as usize;
        }
        if let Some(secs) = env_number("WARDEN_SESSION_TTL")? {
            config.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("WARDEN_SESSION_PROTECTION_GRACE")? {
            config.protection_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("WARDEN_SESSION_REGENERATION_GRACE")? {
            config.regeneration_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("WARDEN_SESSION_LOCK_TIMEOUT")? {
            config.lock_timeout = Duration::from_secs(secs);
        }
        if let Ok(name) = env::var("WARDEN_SESSION_COOKIE_NAME") {
            config.cookie_name = name;
        }
        if let Ok(domain) = env::var("WARDEN_SESSION_COOKIE_DOMAIN") {
            config.cookie_domain = Some(domain).filter(|d| !d.is_empty());
        }
        if let Ok(path) = env::var("WARDEN_SESSION_COOKIE_PATH") {
            config.cookie_path = path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a `.env` file, then read the environment.
    pub fn from_dotenv(path: Option<&str>) -> SessionResult<Self> {
        let loaded = match path {
            Some(path) => dotenvy::from_filename(path).map(|_| ()),
            None => dotenvy::dotenv().map(|_| ()),
        };

        // A missing .env file is fine; a malformed one is not.
        if let Err(e) = loaded
            && !e.not_found()
        {
            return Err(SessionError::Config(e.to_string()));
        }

        Self::from_env()
    }

    /// Check the configuration for values the lifecycle cannot work with.
    pub fn validate(&self) -> SessionResult<()> {
        check_redis_url(&self.redis_url)?;

        if self.ttl.is_zero() {
            return Err(SessionError::Config("session TTL must be positive".into()));
        }
        if self.regeneration_grace > self.ttl {
            return Err(SessionError::Config(
                "regeneration grace must not exceed the session TTL".into(),
            ));
        }
        if self.lock_ttl.is_zero() {
            return Err(SessionError::Config("lock TTL must be positive".into()));
        }
        if self.cookie_name.is_empty() || self.cookie_name == self.language_cookie_name {
            return Err(SessionError::Config(
                "session cookie name must be non-empty and distinct".into(),
            ));
        }

        Ok(())
    }

    /// Set the key namespace.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Set the durable store URL.
    pub fn with_database_url(mut self, url: &str) -> Self {
        self.database_url = Some(url.to_string());
        self
    }

    /// Set the ephemeral TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the protection grace time.
    pub fn with_protection_grace(mut self, grace: Duration) -> Self {
        self.protection_grace = grace;
        self
    }

    /// Set the regeneration grace time.
    pub fn with_regeneration_grace(mut self, grace: Duration) -> Self {
        self.regeneration_grace = grace;
        self
    }

    /// Set the lock wait timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the session cookie name.
    pub fn with_cookie_name(mut self, name: &str) -> Self {
        self.cookie_name = name.to_string();
        self
    }

    /// Scope the cookies to a domain.
    pub fn with_cookie_domain(mut self, domain: &str) -> Self {
        self.cookie_domain = Some(domain.to_string());
        self
    }

    /// Build the ephemeral key for a session id.
    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.namespace, session_id)
    }

    /// Build the lock key for a session id.
    pub fn lock_key(&self, session_id: &str) -> String {
        format!("{}:lock:{}", self.namespace, session_id)
    }

    /// Build the key of a user's index of live session ids.
    pub fn user_key(&self, user_id: i64) -> String {
        format!("{}:user:{}", self.namespace, user_id)
    }
}

fn check_redis_url(url: &str) -> SessionResult<()> {
    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(SessionError::InvalidUrl(
            "Redis URL must start with redis:// or rediss://".to_string(),
        ));
    }
    Ok(())
}

fn env_number(name: &str) -> SessionResult<Option<u64>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| SessionError::Config(format!("{name} must be a whole number"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.protection_grace, Duration::from_secs(3600));
        assert_eq!(config.regeneration_grace, Duration::from_secs(1200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_url() {
        assert!(SessionConfig::redis("http://localhost").is_err());
        assert!(SessionConfig::redis("rediss://cache:6380").is_ok());
    }

    #[test]
    fn test_regeneration_grace_bounded_by_ttl() {
        let config = SessionConfig::default()
            .with_ttl(Duration::from_secs(600))
            .with_regeneration_grace(Duration::from_secs(1200));
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_cookie_names_must_differ() {
        let config = SessionConfig::default().with_cookie_name("lang");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keys() {
        let config = SessionConfig::default().with_namespace("forum");
        assert_eq!(config.session_key("x"), "forum:x");
        assert_eq!(config.lock_key("x"), "forum:lock:x");
        assert_eq!(config.user_key(3), "forum:user:3");
    }
}
