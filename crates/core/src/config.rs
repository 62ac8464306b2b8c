//! Gateway configuration.
//!
//! One explicit struct, constructed at startup and passed by reference into
//! every component that needs it. Nothing in the gateway consults ambient
//! global state. Loadable from a TOML file; the CLI layers flag overrides on
//! top.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// One configured user under an eauth backend.
#[derive(Debug, Clone, Deserialize)]
pub struct UserAuth {
    pub password: String,
    /// Permission patterns returned by a successful login.
    #[serde(default)]
    pub perms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,

    /// Upper bound on concurrent in-flight request handlers.
    pub thread_pool: usize,

    /// Request body cap in bytes.
    pub max_request_body_size: usize,

    /// Session idle timeout in seconds.
    pub session_timeout_secs: u64,

    /// Per-subscriber event buffer size (drop-oldest on overflow).
    pub event_buffer: usize,

    /// Expose raw internal error detail to clients.
    pub debug: bool,

    /// Route name for the webhook resource.
    pub webhook_url: String,

    /// Skip authentication for the webhook resource only.
    pub webhook_disable_auth: bool,

    /// Bootstrap file served for the single-page-app route; the route is
    /// registered only when this is set.
    pub app: Option<PathBuf>,

    /// Route name for the single-page-app resource.
    pub app_path: String,

    /// When set, requests from any other address are refused outright.
    pub authorized_ips: Option<Vec<IpAddr>>,

    /// eauth backend name -> user table.
    pub external_auth: HashMap<String, HashMap<String, UserAuth>>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            thread_pool: 100,
            max_request_body_size: 1_048_576,
            session_timeout_secs: 36_000,
            event_buffer: crate::event::DEFAULT_BUS_CAPACITY,
            debug: false,
            webhook_url: "hook".to_string(),
            webhook_disable_auth: false,
            app: None,
            app_path: "app".to_string(),
            authorized_ips: None,
            external_auth: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, crate::error::GatewayError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::error::GatewayError::Internal(format!(
                "failed to read config {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str(&raw).map_err(|e| {
            crate::error::GatewayError::Internal(format!(
                "failed to parse config {}: {e}",
                path.display()
            ))
        })
    }

    /// Permission patterns configured for a user under an eauth backend.
    pub fn perms_for(&self, eauth: &str, user: &str) -> Option<&[String]> {
        self.external_auth
            .get(eauth)
            .and_then(|users| users.get(user))
            .map(|u| u.perms.as_slice())
    }

    /// A config with one user, for tests and the demo binary.
    pub fn with_test_user(user: &str, password: &str, eauth: &str) -> Self {
        let mut config = GatewayConfig::default();
        config.external_auth.insert(
            eauth.to_string(),
            HashMap::from([(
                user.to_string(),
                UserAuth {
                    password: password.to_string(),
                    perms: vec![
                        "grains.*".to_string(),
                        "status.*".to_string(),
                        "test.*".to_string(),
                    ],
                },
            )]),
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.thread_pool, 100);
        assert_eq!(config.max_request_body_size, 1_048_576);
        assert_eq!(config.webhook_url, "hook");
        assert!(!config.webhook_disable_auth);
        assert!(config.app.is_none());
    }

    #[test]
    fn toml_round_trip_with_auth_table() {
        let raw = r#"
            port = 9000
            debug = true
            webhook_url = "fire"

            [external_auth.pam.saltdev]
            password = "saltdev"
            perms = ["test.*"]
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.debug);
        assert_eq!(config.webhook_url, "fire");
        assert_eq!(
            config.perms_for("pam", "saltdev"),
            Some(&["test.*".to_string()][..])
        );
        assert_eq!(config.perms_for("pam", "nobody"), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<GatewayConfig>("prot = 8000").is_err());
    }
}
