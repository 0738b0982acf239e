//! Plugin configuration.
//!
//! Explicit values always win; anything left unset falls back to the
//! environment. Empty strings count as unset on both sides.

/// Environment key for the agent (NATS) URI.
pub const ENV_AGENT_URI: &str = "AGENT_URI";
/// Environment key for the plugin identifier.
pub const ENV_PLUGIN_ID: &str = "PLUGIN_ID";
/// Environment key for the credential attached to event requests.
pub const ENV_AUTH_KEY: &str = "SOREN_AUTH_KEY";
/// Environment key for the event channel subject prefix.
pub const ENV_EVENT_CHANNEL: &str = "SOREN_EVENT_CHANNEL";
/// Environment key for the store channel subject prefix.
pub const ENV_STORE_CHANNEL: &str = "SOREN_STORE";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("agent URI is required (set it explicitly or via {ENV_AGENT_URI})")]
    MissingAgentUri,
    #[error("plugin ID is required (set it explicitly or via {ENV_PLUGIN_ID})")]
    MissingPluginId,
}

/// Immutable SDK configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    agent_uri: String,
    plugin_id: String,
    auth_key: Option<String>,
    event_channel: Option<String>,
    store_channel: Option<String>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a configuration purely from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigBuilder::default().build()
    }

    pub fn agent_uri(&self) -> &str {
        &self.agent_uri
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn auth_key(&self) -> Option<&str> {
        self.auth_key.as_deref()
    }

    pub fn event_channel(&self) -> Option<&str> {
        self.event_channel.as_deref()
    }

    pub fn store_channel(&self) -> Option<&str> {
        self.store_channel.as_deref()
    }
}

/// Builder merging explicit values over environment defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    agent_uri: Option<String>,
    plugin_id: Option<String>,
    auth_key: Option<String>,
    event_channel: Option<String>,
    store_channel: Option<String>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn agent_uri(mut self, agent_uri: impl Into<String>) -> Self {
        self.agent_uri = Some(agent_uri.into());
        self
    }

    #[must_use]
    pub fn plugin_id(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    #[must_use]
    pub fn auth_key(mut self, auth_key: impl Into<String>) -> Self {
        self.auth_key = Some(auth_key.into());
        self
    }

    #[must_use]
    pub fn event_channel(mut self, event_channel: impl Into<String>) -> Self {
        self.event_channel = Some(event_channel.into());
        self
    }

    #[must_use]
    pub fn store_channel(mut self, store_channel: impl Into<String>) -> Self {
        self.store_channel = Some(store_channel.into());
        self
    }

    /// Build using the process environment for unset fields.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.build_with_env(|key| std::env::var(key).ok())
    }

    /// Build using `lookup` as the environment for unset fields.
    pub fn build_with_env<F>(self, lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |explicit: Option<String>, key: &str| {
            non_empty(explicit).or_else(|| non_empty(lookup(key)))
        };

        let agent_uri = resolve(self.agent_uri, ENV_AGENT_URI).ok_or(ConfigError::MissingAgentUri)?;
        let plugin_id = resolve(self.plugin_id, ENV_PLUGIN_ID).ok_or(ConfigError::MissingPluginId)?;

        Ok(Config {
            agent_uri,
            plugin_id,
            auth_key: resolve(self.auth_key, ENV_AUTH_KEY),
            event_channel: resolve(self.event_channel, ENV_EVENT_CHANNEL),
            store_channel: resolve(self.store_channel, ENV_STORE_CHANNEL),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_values_win_over_environment() {
        let config = Config::builder()
            .agent_uri("localhost:4222")
            .plugin_id("abc")
            .build_with_env(env(&[(ENV_AGENT_URI, "other:1"), (ENV_PLUGIN_ID, "xyz")]))
            .unwrap();
        assert_eq!(config.agent_uri(), "localhost:4222");
        assert_eq!(config.plugin_id(), "abc");
    }

    #[test]
    fn environment_fills_unset_fields() {
        let config = Config::builder()
            .build_with_env(env(&[
                (ENV_AGENT_URI, "nats://broker:4222"),
                (ENV_PLUGIN_ID, "abc"),
                (ENV_AUTH_KEY, "secret"),
                (ENV_EVENT_CHANNEL, "soren.events"),
                (ENV_STORE_CHANNEL, "soren.store"),
            ]))
            .unwrap();
        assert_eq!(config.agent_uri(), "nats://broker:4222");
        assert_eq!(config.auth_key(), Some("secret"));
        assert_eq!(config.event_channel(), Some("soren.events"));
        assert_eq!(config.store_channel(), Some("soren.store"));
    }

    #[test]
    fn missing_mandatory_fields_fail() {
        let err = Config::builder()
            .plugin_id("abc")
            .build_with_env(env(&[]))
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingAgentUri);

        let err = Config::builder()
            .agent_uri("localhost")
            .build_with_env(env(&[(ENV_PLUGIN_ID, "")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingPluginId);
    }

    #[test]
    fn empty_explicit_value_falls_back_to_environment() {
        let config = Config::builder()
            .agent_uri("")
            .plugin_id("abc")
            .event_channel("")
            .build_with_env(env(&[(ENV_AGENT_URI, "broker")]))
            .unwrap();
        assert_eq!(config.agent_uri(), "broker");
        assert_eq!(config.event_channel(), None);
    }
}
