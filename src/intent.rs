use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
pub use speech_session_types::IntentResolution;

use crate::error::SessionError;

/// Reference to an external language-understanding model. Opaque to the
/// session; the recognition engine decides how to fetch or load it.
#[derive(Debug)]
pub enum LanguageUnderstandingModel {
    FromSubscription {
        region: String,
        subscription_key: SecretString,
        app_id: String,
    },
    FromEndpoint(String),
    FromAppId(String),
}

impl LanguageUnderstandingModel {
    pub fn from_subscription(region: &str, subscription_key: &str, app_id: &str) -> Self {
        Self::FromSubscription {
            region: region.to_string(),
            subscription_key: SecretString::from(subscription_key.to_string()),
            app_id: app_id.to_string(),
        }
    }

    pub fn from_endpoint(endpoint: &str) -> Self {
        Self::FromEndpoint(endpoint.to_string())
    }

    pub fn from_app_id(app_id: &str) -> Self {
        Self::FromAppId(app_id.to_string())
    }

    pub fn app_id(&self) -> Option<&str> {
        match self {
            Self::FromSubscription { app_id, .. } | Self::FromAppId(app_id) => Some(app_id),
            Self::FromEndpoint(_) => None,
        }
    }
}

impl Clone for LanguageUnderstandingModel {
    fn clone(&self) -> Self {
        match self {
            Self::FromSubscription {
                region,
                subscription_key,
                app_id,
            } => Self::FromSubscription {
                region: region.clone(),
                subscription_key: SecretString::from(subscription_key.expose_secret().to_string()),
                app_id: app_id.clone(),
            },
            Self::FromEndpoint(endpoint) => Self::FromEndpoint(endpoint.clone()),
            Self::FromAppId(app_id) => Self::FromAppId(app_id.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Intent {
    id: String,
    display_label: String,
    model: LanguageUnderstandingModel,
}

impl Intent {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    pub fn model(&self) -> &LanguageUnderstandingModel {
        &self.model
    }
}

/// Maps intent ids to their labels and models.
///
/// Lookups take `&self` and never lock, so the table can be shared across
/// threads behind an `Arc`. Mutation needs `&mut self`; a recognition session
/// only hands out a shared snapshot while recognition is running, which is
/// what keeps writes off the hot path.
#[derive(Debug, Clone, Default)]
pub struct IntentBindingTable {
    intents: HashMap<String, Intent>,
}

impl IntentBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_intent(
        &mut self,
        id: &str,
        model: LanguageUnderstandingModel,
        label: &str,
    ) -> Result<(), SessionError> {
        if self.intents.contains_key(id) {
            return Err(SessionError::DuplicateId(id.to_string()));
        }
        self.intents.insert(
            id.to_string(),
            Intent {
                id: id.to_string(),
                display_label: label.to_string(),
                model,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> IntentResolution {
        match self.intents.get(id) {
            Some(intent) => IntentResolution::Label(intent.display_label.clone()),
            None => IntentResolution::Unknown,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Intent> {
        self.intents.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intent> {
        self.intents.values()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}
