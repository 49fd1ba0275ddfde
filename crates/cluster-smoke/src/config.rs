//! Smoke-test configuration.
//!
//! Settings come from the process environment, optionally pre-populated
//! from a `.env` file in the working directory.

use tracing::debug;

use crate::error::{Error, Result};

/// Provider used when `CLOUD_PROVIDER` is unset.
pub const DEFAULT_PROVIDER: &str = "digitalocean";

/// Required keys, in the order they are reported when missing.
pub const REQUIRED_KEYS: [&str; 4] = [
    "RANCHER_VERSION",
    "K3S_VERSION",
    "RANCHER_URL",
    "RANCHER_TOKEN",
];

/// Validated configuration, created once at startup.
#[derive(Clone)]
pub struct SmokeConfig {
    /// Rancher server version under test (e.g., "v2.9.2").
    pub rancher_version: String,
    /// K3s version for the downstream cluster (e.g., "v1.30.4+k3s1").
    pub k3s_version: String,
    /// Rancher server URL, with or without scheme.
    pub rancher_url: String,
    /// Rancher API bearer token.
    pub token: String,
    /// Cloud provider name; selects the terraform working directory.
    pub provider: String,
    /// Accept self-signed certificates from the Rancher server.
    pub insecure_tls: bool,
}

impl std::fmt::Debug for SmokeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmokeConfig")
            .field("rancher_version", &self.rancher_version)
            .field("k3s_version", &self.k3s_version)
            .field("rancher_url", &self.rancher_url)
            .field("token", &"[REDACTED]")
            .field("provider", &self.provider)
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

impl SmokeConfig {
    /// Load configuration from `.env` (if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigFile`] if `.env` exists but is malformed, or
    /// [`Error::MissingConfig`] naming every required key that is unset.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => debug!("No .env file found, using environment only"),
            Err(e) => return Err(Error::ConfigFile(e)),
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values count as missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfig`] listing all missing required keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|&&key| get(key).is_none())
            .map(|key| (*key).to_string())
            .collect();

        if !missing.is_empty() {
            return Err(Error::MissingConfig(missing));
        }

        let insecure_tls = get("RANCHER_INSECURE").map_or(true, |v| parse_bool(&v));

        Ok(Self {
            rancher_version: get("RANCHER_VERSION").unwrap_or_default(),
            k3s_version: get("K3S_VERSION").unwrap_or_default(),
            rancher_url: get("RANCHER_URL").unwrap_or_default(),
            token: get("RANCHER_TOKEN").unwrap_or_default(),
            provider: get("CLOUD_PROVIDER").unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            insecure_tls,
        })
    }
}

fn parse_bool(value: &str) -> bool {
    !matches!(
        value.trim().to_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serial_test::serial;

    use super::*;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("RANCHER_VERSION", "v2.9.2"),
            ("K3S_VERSION", "v1.30.4+k3s1"),
            ("RANCHER_URL", "rancher.example.com"),
            ("RANCHER_TOKEN", "token-abc:secret"),
        ])
    }

    fn load_from(env: &HashMap<&'static str, &'static str>) -> Result<SmokeConfig> {
        SmokeConfig::from_lookup(|key| env.get(key).map(|v| (*v).to_string()))
    }

    fn missing_keys(result: Result<SmokeConfig>) -> Vec<String> {
        match result {
            Err(Error::MissingConfig(keys)) => keys,
            other => panic!("expected MissingConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_load_complete() {
        let config = load_from(&full_env()).unwrap();
        assert_eq!(config.rancher_version, "v2.9.2");
        assert_eq!(config.k3s_version, "v1.30.4+k3s1");
        assert_eq!(config.rancher_url, "rancher.example.com");
        assert_eq!(config.token, "token-abc:secret");
        assert_eq!(config.provider, DEFAULT_PROVIDER);
        assert!(config.insecure_tls);
    }

    #[test]
    fn test_provider_override() {
        let mut env = full_env();
        env.insert("CLOUD_PROVIDER", "aws");
        assert_eq!(load_from(&env).unwrap().provider, "aws");
    }

    #[test]
    fn test_single_missing_key() {
        let mut env = full_env();
        env.remove("RANCHER_TOKEN");
        assert_eq!(missing_keys(load_from(&env)), vec!["RANCHER_TOKEN"]);
    }

    #[test]
    fn test_empty_value_is_missing() {
        let mut env = full_env();
        env.insert("K3S_VERSION", "");
        assert_eq!(missing_keys(load_from(&env)), vec!["K3S_VERSION"]);
    }

    #[test]
    fn test_every_subset_reported_completely() {
        for mask in 1u8..16 {
            let mut env = full_env();
            let expected: Vec<String> = REQUIRED_KEYS
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, key)| (*key).to_string())
                .collect();
            for key in &expected {
                env.remove(key.as_str());
            }
            assert_eq!(missing_keys(load_from(&env)), expected, "mask {mask:#06b}");
        }
    }

    #[test]
    fn test_missing_config_message_lists_all() {
        let err = load_from(&HashMap::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required environment variables: RANCHER_VERSION, K3S_VERSION, RANCHER_URL, RANCHER_TOKEN"
        );
    }

    #[test]
    fn test_insecure_flag_parsing() {
        let mut env = full_env();
        env.insert("RANCHER_INSECURE", "false");
        assert!(!load_from(&env).unwrap().insecure_tls);
        env.insert("RANCHER_INSECURE", "1");
        assert!(load_from(&env).unwrap().insecure_tls);
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = load_from(&full_env()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_env() {
        for (key, value) in full_env() {
            std::env::set_var(key, value);
        }
        std::env::set_var("CLOUD_PROVIDER", "digitalocean");

        let config = SmokeConfig::load().unwrap();
        assert_eq!(config.rancher_url, "rancher.example.com");
        assert_eq!(config.provider, "digitalocean");

        for key in REQUIRED_KEYS {
            std::env::remove_var(key);
        }
        std::env::remove_var("CLOUD_PROVIDER");
    }
}
