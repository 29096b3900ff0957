use secrecy::{ExposeSecret, SecretString};

/// Wraps a provider API key (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_key() {
        let key = ApiKey::new("sk-12345");
        let debug = format!("{key:?}");
        assert!(!debug.contains("sk-12345"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn expose_returns_raw_value() {
        assert_eq!(ApiKey::new("sk-abc").expose(), "sk-abc");
    }
}
