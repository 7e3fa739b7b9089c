//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs the credential encryption key, where
//! stored credentials are seeded from, which bearer tokens map to which callers, and how
//! the upstream GitHub API is reached.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// GitHub's own default page size for list endpoints.
const DEFAULT_PULLS_PER_PAGE: u32 = 30;
const MAX_PULLS_PER_PAGE: u32 = 100;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "facebook").
    pub owner: String,
    /// The name of the repository (e.g., "react").
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A bearer token accepted by the static identity verifier and the caller it identifies.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub caller_id: String,
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("token", &"<redacted>")
            .field("caller_id", &self.caller_id)
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Base64 encoded 256-bit key used to decrypt stored upstream credentials.
    pub credential_key: String,

    /// Optional JSON file seeding the credential store at startup.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Bearer tokens accepted by the API and the caller identity each one verifies as.
    /// Expected format: comma-separated string of "token=caller" pairs.
    /// Example: "s3cr3t=alice,0th3r=bob"
    #[serde(default, deserialize_with = "deserialize_api_tokens")]
    pub api_tokens: Vec<ApiToken>,

    /// Optional GitHub API base URI (GitHub Enterprise, test servers).
    #[serde(default)]
    pub github_api_base: Option<String>,

    /// Size of the single page requested from the pull request listing endpoint.
    #[serde(default = "default_pulls_per_page")]
    pub pulls_per_page: u32,

    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Emit logs as JSON lines instead of the human readable format.
    #[serde(default)]
    pub log_json: bool,
}

fn default_pulls_per_page() -> u32 {
    DEFAULT_PULLS_PER_PAGE
}

fn default_port() -> u16 {
    3000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// The listing page size, clamped to what GitHub accepts.
    pub fn pulls_per_page(&self) -> u8 {
        // Always fits: the clamp bound is below u8::MAX.
        self.pulls_per_page.clamp(1, MAX_PULLS_PER_PAGE) as u8
    }
}

fn deserialize_api_tokens<'de, D>(deserializer: D) -> Result<Vec<ApiToken>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(parse_api_tokens(&s))
}

fn parse_api_tokens(s: &str) -> Vec<ApiToken> {
    s.split(',')
        .filter_map(|part| {
            let (token, caller_id) = part.trim().split_once('=')?;
            let token = token.trim();
            let caller_id = caller_id.trim();
            if token.is_empty() || caller_id.is_empty() {
                return None;
            }
            Some(ApiToken {
                token: token.to_string(),
                caller_id: caller_id.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 7] = [
        "CREDENTIAL_KEY",
        "CREDENTIALS_FILE",
        "API_TOKENS",
        "GITHUB_API_BASE",
        "PULLS_PER_PAGE",
        "PORT",
        "LOG_JSON",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        env::set_var("CREDENTIAL_KEY", "a2V5");
        env::set_var("CREDENTIALS_FILE", "/etc/pr-analytics/credentials.json");
        env::set_var("API_TOKENS", "tok1=alice, tok2=bob");
        env::set_var("GITHUB_API_BASE", "http://localhost:9000");
        env::set_var("PULLS_PER_PAGE", "50");
        env::set_var("PORT", "8080");
        env::set_var("LOG_JSON", "true");

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.credential_key, "a2V5");
        assert_eq!(
            config.credentials_file,
            Some(PathBuf::from("/etc/pr-analytics/credentials.json"))
        );
        assert_eq!(config.api_tokens.len(), 2);
        assert_eq!(config.api_tokens[1].token, "tok2");
        assert_eq!(config.api_tokens[1].caller_id, "bob");
        assert_eq!(
            config.github_api_base.as_deref(),
            Some("http://localhost:9000")
        );
        assert_eq!(config.pulls_per_page(), 50);
        assert_eq!(config.port, 8080);
        assert!(config.log_json);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();
        env::set_var("CREDENTIAL_KEY", "a2V5");

        let config = AppConfig::from_env().expect("Failed to load config");

        assert!(config.credentials_file.is_none());
        assert!(config.api_tokens.is_empty());
        assert!(config.github_api_base.is_none());
        assert_eq!(config.pulls_per_page(), 30);
        assert_eq!(config.port, 3000);
        assert!(!config.log_json);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_oversized_page_size_is_clamped() {
        clear_env();
        env::set_var("CREDENTIAL_KEY", "a2V5");
        env::set_var("PULLS_PER_PAGE", "500");

        let config = AppConfig::from_env().expect("Failed to load config");

        assert_eq!(config.pulls_per_page, 500);
        assert_eq!(config.pulls_per_page(), 100);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_missing_vars() {
        clear_env();
        let result = AppConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_api_tokens_skips_malformed_pairs() {
        let tokens = parse_api_tokens("good=alice,,no-separator,=nobody,orphan=, x = carol ");

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].caller_id, "alice");
        assert_eq!(tokens[1].token, "x");
        assert_eq!(tokens[1].caller_id, "carol");
    }

    #[test]
    fn test_pulls_per_page_is_clamped() {
        let mut config = AppConfig {
            credential_key: String::new(),
            credentials_file: None,
            api_tokens: vec![],
            github_api_base: None,
            pulls_per_page: 0,
            port: 3000,
            log_json: false,
        };
        assert_eq!(config.pulls_per_page(), 1);

        config.pulls_per_page = 250;
        assert_eq!(config.pulls_per_page(), 100);

        config.pulls_per_page = 70_000;
        assert_eq!(config.pulls_per_page(), 100);
    }

    #[test]
    fn test_api_token_debug_redacts_secret() {
        let token = ApiToken {
            token: "very-secret".to_string(),
            caller_id: "alice".to_string(),
        };
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("alice"));
    }
}
