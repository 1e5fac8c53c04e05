//! Environment-driven configuration.
//!
//! Flows and credentials are never checked into config files for this
//! engine; everything is read from the process environment, optionally
//! preloaded from a `.env` file when `USE_DOTENV` is not `"off"`.

use std::env;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ari_host: String,
    pub ari_username: String,
    pub ari_password: String,
    pub ari_use_proxy: bool,
    pub natsgw_url: Option<String>,
    pub application: String,
    pub proxy_host: Option<String>,
    pub lineblocs_key: Option<String>,
    pub deployment_domain: String,
    pub management_api_base: String,
}

impl EngineConfig {
    /// Load configuration from the environment, optionally loading a
    /// `.env` file first.
    pub fn from_env() -> Result<Self> {
        let use_dotenv = env::var("USE_DOTENV").unwrap_or_default();
        if use_dotenv != "off" {
            // Missing .env file is not an error; only malformed ones are.
            match dotenvy::dotenv() {
                Ok(_) | Err(dotenvy::Error::Io(_)) => {}
                Err(e) => return Err(EngineError::configuration(format!(".env: {e}"))),
            }
        }

        let ari_host = env::var("ARI_HOST")
            .map_err(|_| EngineError::configuration("ARI_HOST is required"))?;
        let ari_username = env::var("ARI_USERNAME").unwrap_or_default();
        let ari_password = env::var("ARI_PASSWORD").unwrap_or_default();
        let ari_use_proxy = env::var("ARI_USE_PROXY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let natsgw_url = env::var("NATSGW_URL").ok();
        let proxy_host = env::var("PROXY_HOST").ok();
        let lineblocs_key = env::var("LINEBLOCS_KEY").ok();
        let deployment_domain =
            env::var("DEPLOYMENT_DOMAIN").unwrap_or_else(|_| "lineblocs.com".to_string());
        let management_api_base = env::var("MANAGEMENT_API_BASE")
            .unwrap_or_else(|_| "https://api.lineblocs.com".to_string());

        let config = Self {
            ari_host,
            ari_username,
            ari_password,
            ari_use_proxy,
            natsgw_url,
            application: "lineblocs".to_string(),
            proxy_host,
            lineblocs_key,
            deployment_domain,
            management_api_base,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ari_host.is_empty() {
            return Err(EngineError::configuration("ARI_HOST cannot be empty"));
        }
        if self.ari_use_proxy && self.natsgw_url.is_none() {
            return Err(EngineError::configuration(
                "ARI_USE_PROXY=true requires NATSGW_URL",
            ));
        }
        Ok(())
    }

    pub fn ari_url(&self) -> String {
        format!("http://{}:8088/ari", self.ari_host)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:8088/ari/events", self.ari_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_host() {
        let cfg = EngineConfig {
            ari_host: String::new(),
            ari_username: String::new(),
            ari_password: String::new(),
            ari_use_proxy: false,
            natsgw_url: None,
            application: "lineblocs".to_string(),
            proxy_host: None,
            lineblocs_key: None,
            deployment_domain: "lineblocs.com".to_string(),
            management_api_base: "https://api.lineblocs.com".to_string(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn proxy_requires_natsgw() {
        let cfg = EngineConfig {
            ari_host: "gw1".to_string(),
            ari_username: String::new(),
            ari_password: String::new(),
            ari_use_proxy: true,
            natsgw_url: None,
            application: "lineblocs".to_string(),
            proxy_host: None,
            lineblocs_key: None,
            deployment_domain: "lineblocs.com".to_string(),
            management_api_base: "https://api.lineblocs.com".to_string(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn builds_urls_from_host() {
        let cfg = EngineConfig {
            ari_host: "gw1".to_string(),
            ari_username: String::new(),
            ari_password: String::new(),
            ari_use_proxy: false,
            natsgw_url: None,
            application: "lineblocs".to_string(),
            proxy_host: None,
            lineblocs_key: None,
            deployment_domain: "lineblocs.com".to_string(),
            management_api_base: "https://api.lineblocs.com".to_string(),
        };
        assert_eq!(cfg.ari_url(), "http://gw1:8088/ari");
        assert_eq!(cfg.ws_url(), "ws://gw1:8088/ari/events");
    }
}
