//! Session configuration.
//!
//! Both configs can be assembled with a builder or loaded from the
//! environment (a `.env` file is honoured through `dotenvy`).

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

pub mod consts;

use consts::*;

/// A custom error type for configuration loading failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How the backend routes activities. `AutoReply` echoes without a bot
/// behind the channel, which is what the end-to-end tests rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub enum CommunicationType {
    Default,
    AutoReply,
}

impl CommunicationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationType::Default => "Default",
            CommunicationType::AutoReply => "AutoReply",
        }
    }
}

impl std::str::FromStr for CommunicationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(CommunicationType::Default),
            "autoreply" | "auto_reply" => Ok(CommunicationType::AutoReply),
            _ => Err(ConfigError::InvalidValue(
                BOT_COMMUNICATION_TYPE.to_string(),
                format!("'{}' is not a communication type", s),
            )),
        }
    }
}

pub struct SpeechConfig {
    subscription_key: SecretString,
    region: String,
    language: String,
    endpoint: Option<String>,
}

impl std::fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("region", &self.region)
            .field("language", &self.language)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Clone for SpeechConfig {
    fn clone(&self) -> Self {
        Self {
            subscription_key: clone_secret(&self.subscription_key),
            region: self.region.clone(),
            language: self.language.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechConfig {
    pub fn new() -> Self {
        Self {
            subscription_key: SecretString::from(String::new()),
            region: DEFAULT_REGION.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            endpoint: None,
        }
    }

    pub fn builder() -> SpeechConfigBuilder {
        SpeechConfigBuilder::new()
    }

    /// Loads configuration from environment variables.
    ///
    /// *   `SPEECH_SUBSCRIPTION_KEY`: required.
    /// *   `SPEECH_REGION`: (Optional) defaults to "westus".
    /// *   `SPEECH_LANGUAGE`: (Optional) defaults to "en-US".
    /// *   `SPEECH_ENDPOINT`: (Optional) overrides the region-derived endpoint.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let subscription_key = lookup(SPEECH_SUBSCRIPTION_KEY)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingVar(SPEECH_SUBSCRIPTION_KEY.to_string()))?;
        let region = lookup(SPEECH_REGION).unwrap_or_else(|| DEFAULT_REGION.to_string());
        let language = lookup(SPEECH_LANGUAGE).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let endpoint = lookup(SPEECH_ENDPOINT);
        if let Some(endpoint) = &endpoint {
            validate_endpoint(SPEECH_ENDPOINT, endpoint)?;
        }

        Ok(Self {
            subscription_key: SecretString::from(subscription_key),
            region,
            language,
            endpoint,
        })
    }

    pub fn subscription_key(&self) -> &SecretString {
        &self.subscription_key
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

pub struct SpeechConfigBuilder {
    config: SpeechConfig,
}

impl Default for SpeechConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SpeechConfig::new(),
        }
    }

    pub fn with_subscription_key(mut self, key: &str) -> Self {
        self.config.subscription_key = SecretString::from(key.to_string());
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.config.region = region.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.config.language = language.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.config.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn build(self) -> SpeechConfig {
        self.config
    }
}

pub struct BotConnectorConfig {
    speech: SpeechConfig,
    channel_secret: SecretString,
    communication_type: CommunicationType,
    properties: HashMap<String, String>,
    capacity: usize,
}

impl std::fmt::Debug for BotConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConnectorConfig")
            .field("speech", &self.speech)
            .field("communication_type", &self.communication_type)
            .field("properties", &self.properties)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Clone for BotConnectorConfig {
    fn clone(&self) -> Self {
        Self {
            speech: self.speech.clone(),
            channel_secret: clone_secret(&self.channel_secret),
            communication_type: self.communication_type,
            properties: self.properties.clone(),
            capacity: self.capacity,
        }
    }
}

impl BotConnectorConfig {
    /// Mirrors the secret-key construction of a bot channel: the channel
    /// secret plus the speech subscription that carries the audio.
    pub fn from_secret_key(channel_secret: &str, subscription_key: &str, region: &str) -> Self {
        Self {
            speech: SpeechConfig::builder()
                .with_subscription_key(subscription_key)
                .with_region(region)
                .build(),
            channel_secret: SecretString::from(channel_secret.to_string()),
            communication_type: CommunicationType::Default,
            properties: HashMap::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Loads the speech settings plus:
    ///
    /// *   `BOT_CHANNEL_SECRET`: (Optional) not needed for `AutoReply`.
    /// *   `BOT_COMMUNICATION_TYPE`: (Optional) "Default" or "AutoReply".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let speech = SpeechConfig::from_lookup(&lookup)?;
        let communication_type = match lookup(BOT_COMMUNICATION_TYPE) {
            Some(value) => value.parse::<CommunicationType>()?,
            None => CommunicationType::Default,
        };
        let channel_secret = lookup(BOT_CHANNEL_SECRET).unwrap_or_default();
        if channel_secret.is_empty() && communication_type != CommunicationType::AutoReply {
            return Err(ConfigError::MissingVar(format!(
                "{} must be set unless {} is AutoReply",
                BOT_CHANNEL_SECRET, BOT_COMMUNICATION_TYPE
            )));
        }

        Ok(Self {
            speech,
            channel_secret: SecretString::from(channel_secret),
            communication_type,
            properties: HashMap::new(),
            capacity: DEFAULT_CAPACITY,
        })
    }

    pub fn with_communication_type(mut self, communication_type: CommunicationType) -> Self {
        self.communication_type = communication_type;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.speech.language = language.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.speech.endpoint = Some(endpoint.to_string());
        self
    }

    /// Send queue depth for outgoing frames.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Sets a free-form connection property. The communication type
    /// property is recognised and kept in sync with the typed setting.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        if name == COMMUNICATION_TYPE_PROPERTY {
            self.communication_type = value.parse()?;
        }
        self.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        if name == COMMUNICATION_TYPE_PROPERTY {
            return Some(self.communication_type.as_str());
        }
        self.properties.get(name).map(String::as_str)
    }

    pub fn speech(&self) -> &SpeechConfig {
        &self.speech
    }

    pub fn channel_secret(&self) -> &SecretString {
        &self.channel_secret
    }

    pub fn communication_type(&self) -> CommunicationType {
        self.communication_type
    }

    pub fn language(&self) -> &str {
        self.speech.language()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every property that goes on the connection request, including the
    /// communication type.
    pub fn connection_properties(&self) -> Vec<(String, String)> {
        let mut properties: Vec<(String, String)> = self
            .properties
            .iter()
            .filter(|(name, _)| name.as_str() != COMMUNICATION_TYPE_PROPERTY)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        properties.sort();
        properties.push((
            COMMUNICATION_TYPE_PROPERTY.to_string(),
            self.communication_type.as_str().to_string(),
        ));
        properties
    }

    /// The websocket endpoint: the explicit override, or the regional
    /// conversation endpoint.
    pub fn endpoint(&self) -> String {
        match self.speech.endpoint() {
            Some(endpoint) => endpoint.to_string(),
            None => format!(
                "wss://{}.convai.speech.microsoft.com/api/v3",
                self.speech.region()
            ),
        }
    }
}

fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn validate_endpoint(name: &str, endpoint: &str) -> Result<(), ConfigError> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a ws:// or wss:// url", endpoint),
        ))
    }
}
