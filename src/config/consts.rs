pub const SPEECH_SUBSCRIPTION_KEY: &str = "SPEECH_SUBSCRIPTION_KEY";
pub const SPEECH_REGION: &str = "SPEECH_REGION";
pub const SPEECH_LANGUAGE: &str = "SPEECH_LANGUAGE";
pub const SPEECH_ENDPOINT: &str = "SPEECH_ENDPOINT";
pub const BOT_CHANNEL_SECRET: &str = "BOT_CHANNEL_SECRET";
pub const BOT_COMMUNICATION_TYPE: &str = "BOT_COMMUNICATION_TYPE";

pub const DEFAULT_REGION: &str = "westus";
pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_CAPACITY: usize = 1024;

pub const COMMUNICATION_TYPE_PROPERTY: &str = "Conversation_Communication_Type";

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const CONNECTION_ID_HEADER: &str = "X-ConnectionId";
pub const CONNECTION_PROPERTIES_HEADER: &str = "X-Conversation-Properties";
