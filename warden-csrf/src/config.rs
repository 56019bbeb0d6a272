/// CSRF protection configuration
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Form field carrying the token
    pub field_name: String,

    /// Header carrying the token (for script-driven submissions)
    pub header_name: String,

    /// Methods never checked for CSRF
    pub safe_methods: Vec<String>,

    /// Path prefixes excluded from CSRF protection
    pub exclude_paths: Vec<String>,
}

impl CsrfConfig {
    /// Create a configuration with the default names.
    pub fn new() -> Self {
        Self {
            field_name: "csrf_token".to_string(),
            header_name: "X-CSRF-Token".to_string(),
            safe_methods: vec![
                "GET".to_string(),
                "HEAD".to_string(),
                "OPTIONS".to_string(),
            ],
            exclude_paths: Vec::new(),
        }
    }

    /// Set field name
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Set header name
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Replace the safe methods
    pub fn with_safe_methods(mut self, methods: Vec<String>) -> Self {
        self.safe_methods = methods;
        self
    }

    /// Replace the excluded path prefixes
    pub fn with_exclude_paths(mut self, paths: Vec<String>) -> Self {
        self.exclude_paths = paths;
        self
    }

    /// Whether `method` is exempt from validation.
    pub fn is_safe_method(&self, method: &str) -> bool {
        self.safe_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CsrfConfig::default();
        assert_eq!(config.field_name, "csrf_token");
        assert_eq!(config.header_name, "X-CSRF-Token");
        assert!(config.is_safe_method("get"));
        assert!(!config.is_safe_method("POST"));
    }

    #[test]
    fn test_config_builder() {
        let config = CsrfConfig::new()
            .with_field_name("_token")
            .with_header_name("X-Token")
            .with_safe_methods(vec!["GET".to_string()]);

        assert_eq!(config.field_name, "_token");
        assert_eq!(config.header_name, "X-Token");
        assert!(!config.is_safe_method("HEAD"));
    }
}
