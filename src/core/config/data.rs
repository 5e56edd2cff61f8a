use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "moonshotai/kimi-k2:free";
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const DEFAULT_REFERER: &str = "http://localhost:3000";
pub const DEFAULT_TITLE: &str = "AI Chat App";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_MAX_DURATION_SECS: u64 = 30;

pub const ENV_BASE_URL: &str = "RELAYCHAT_BASE_URL";
pub const ENV_MODEL: &str = "RELAYCHAT_MODEL";
pub const ENV_LISTEN_ADDR: &str = "RELAYCHAT_LISTEN_ADDR";
pub const ENV_RELAY_URL: &str = "RELAYCHAT_RELAY_URL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the provider API key.
    pub api_key_env: String,
    pub referer: String,
    pub title: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn completions_url(&self) -> String {
        construct_api_url(&self.base_url, "chat/completions")
    }

    /// Reads the API key at call time so a missing key surfaces per request.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Ceiling on the total duration of one relayed response.
    pub max_duration_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
        }
    }
}

impl ServerConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs.max(1))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.listen_addr.parse()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn chat_endpoint(&self) -> String {
        construct_api_url(&self.relay_url, "api/chat")
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Applies `RELAYCHAT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.apply_overrides(&vars);
    }

    pub(crate) fn apply_overrides(&mut self, vars: &HashMap<String, String>) {
        let lookup = |key: &str| {
            vars.get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.provider.base_url = base_url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.provider.model = model;
        }
        if let Some(addr) = lookup(ENV_LISTEN_ADDR) {
            self.server.listen_addr = addr;
        }
        if let Some(url) = lookup(ENV_RELAY_URL) {
            self.client.relay_url = url;
        }
    }
}

/// Normalize a base URL by removing trailing slashes
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path without doubling slashes.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{normalized_base}/{endpoint}")
}

pub(crate) fn path_display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_openrouter() {
        let config = Config::default();
        assert_eq!(
            config.provider.completions_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(config.server.max_duration(), Duration::from_secs(30));
        assert_eq!(config.client.chat_endpoint(), "http://127.0.0.1:3000/api/chat");
    }

    #[test]
    fn construct_api_url_trims_slashes() {
        assert_eq!(
            construct_api_url("https://api.example.com/v1///", "/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(normalize_base_url("http://host"), "http://host");
    }

    #[test]
    fn overrides_replace_only_non_empty_values() {
        let mut config = Config::default();
        let vars = HashMap::from([
            (ENV_MODEL.to_string(), "openai/gpt-4o-mini".to_string()),
            (ENV_BASE_URL.to_string(), "   ".to_string()),
            (ENV_RELAY_URL.to_string(), "http://relay:8080/".to_string()),
        ]);

        config.apply_overrides(&vars);

        assert_eq!(config.provider.model, "openai/gpt-4o-mini");
        assert_eq!(config.provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.client.chat_endpoint(), "http://relay:8080/api/chat");
    }

    #[test]
    fn zero_duration_is_clamped() {
        let server = ServerConfig {
            max_duration_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(server.max_duration(), Duration::from_secs(1));
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: Config = toml::from_str("[provider]\nmodel = \"m\"\n").unwrap();
        assert_eq!(config.provider.model, "m");
        assert_eq!(config.provider.api_key_env, DEFAULT_API_KEY_ENV);
        assert_eq!(config.server, ServerConfig::default());
    }
}
