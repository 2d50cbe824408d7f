//! Share payload types and assembly from the current session state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{Result, ShareError};

/// Speaker of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Payload carried (encrypted) inside a shared link.
///
/// Every field is optional; `None` means "not shared". Serialisation skips
/// absent fields and unknown fields are rejected, so links written in an
/// older layout fail loudly instead of applying nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SharePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tail of the conversation, oldest first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_library: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_library: Option<Value>,
    /// Connection name to secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_connections: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
}

impl SharePayload {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Fields present in this payload, in canonical order
    pub fn fields(&self) -> Vec<ShareField> {
        ShareField::ALL
            .into_iter()
            .filter(|field| self.has(*field))
            .collect()
    }

    pub fn has(&self, field: ShareField) -> bool {
        match field {
            ShareField::BaseUrl => self.base_url.is_some(),
            ShareField::ApiKey => self.api_key.is_some(),
            ShareField::Model => self.model.is_some(),
            ShareField::Messages => self.messages.is_some(),
            ShareField::PromptLibrary => self.prompt_library.is_some(),
            ShareField::FunctionLibrary => self.function_library.is_some(),
            ShareField::McpConnections => self.mcp_connections.is_some(),
            ShareField::WelcomeMessage => self.welcome_message.is_some(),
        }
    }

    /// Canonical JSON bytes (field order is fixed by the struct layout)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ShareError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            // serde messages can quote field values, so only the position is logged
            debug!(
                line = e.line(),
                column = e.column(),
                category = ?e.classify(),
                "payload parse failed"
            );
            ShareError::SerializationError(format!("{:?}", e.classify()).to_lowercase())
        })
    }
}

/// A selectable field category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShareField {
    BaseUrl,
    ApiKey,
    Model,
    Messages,
    PromptLibrary,
    FunctionLibrary,
    McpConnections,
    WelcomeMessage,
}

impl ShareField {
    pub const ALL: [ShareField; 8] = [
        ShareField::BaseUrl,
        ShareField::ApiKey,
        ShareField::Model,
        ShareField::Messages,
        ShareField::PromptLibrary,
        ShareField::FunctionLibrary,
        ShareField::McpConnections,
        ShareField::WelcomeMessage,
    ];

    /// Key used in the serialised payload
    pub fn as_str(self) -> &'static str {
        match self {
            ShareField::BaseUrl => "baseUrl",
            ShareField::ApiKey => "apiKey",
            ShareField::Model => "model",
            ShareField::Messages => "messages",
            ShareField::PromptLibrary => "promptLibrary",
            ShareField::FunctionLibrary => "functionLibrary",
            ShareField::McpConnections => "mcpConnections",
            ShareField::WelcomeMessage => "welcomeMessage",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ShareField::BaseUrl => "Base URL",
            ShareField::ApiKey => "API key",
            ShareField::Model => "Model",
            ShareField::Messages => "Conversation",
            ShareField::PromptLibrary => "Prompt library",
            ShareField::FunctionLibrary => "Function library",
            ShareField::McpConnections => "MCP connections",
            ShareField::WelcomeMessage => "Welcome message",
        }
    }
}

impl fmt::Display for ShareField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which fields the user wants in an outgoing link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareSelection {
    pub base_url: bool,
    pub api_key: bool,
    pub model: bool,
    pub messages: bool,
    /// How many trailing messages to include; values below 1 count as 1
    pub message_count: usize,
    pub prompt_library: bool,
    pub function_library: bool,
    pub mcp_connections: bool,
    pub welcome_message: bool,
}

impl Default for ShareSelection {
    fn default() -> Self {
        Self {
            base_url: false,
            api_key: false,
            model: false,
            messages: false,
            message_count: 1,
            prompt_library: false,
            function_library: false,
            mcp_connections: false,
            welcome_message: false,
        }
    }
}

impl ShareSelection {
    pub fn all(message_count: usize) -> Self {
        Self {
            base_url: true,
            api_key: true,
            model: true,
            messages: true,
            message_count,
            prompt_library: true,
            function_library: true,
            mcp_connections: true,
            welcome_message: true,
        }
    }

    pub fn includes(&self, field: ShareField) -> bool {
        match field {
            ShareField::BaseUrl => self.base_url,
            ShareField::ApiKey => self.api_key,
            ShareField::Model => self.model,
            ShareField::Messages => self.messages,
            ShareField::PromptLibrary => self.prompt_library,
            ShareField::FunctionLibrary => self.function_library,
            ShareField::McpConnections => self.mcp_connections,
            ShareField::WelcomeMessage => self.welcome_message,
        }
    }

    pub fn set(&mut self, field: ShareField, on: bool) {
        match field {
            ShareField::BaseUrl => self.base_url = on,
            ShareField::ApiKey => self.api_key = on,
            ShareField::Model => self.model = on,
            ShareField::Messages => self.messages = on,
            ShareField::PromptLibrary => self.prompt_library = on,
            ShareField::FunctionLibrary => self.function_library = on,
            ShareField::McpConnections => self.mcp_connections = on,
            ShareField::WelcomeMessage => self.welcome_message = on,
        }
    }

    pub fn is_empty(&self) -> bool {
        !ShareField::ALL.into_iter().any(|field| self.includes(field))
    }
}

/// Read-only view over the settings, conversation and connection stores.
pub trait SourceState {
    fn base_url(&self) -> Option<&str>;
    fn api_key(&self) -> Option<&str>;
    fn model(&self) -> Option<&str>;
    /// Full history, oldest first
    fn messages(&self) -> &[ChatMessage];
    fn prompt_library(&self) -> Option<&Value>;
    fn function_library(&self) -> Option<&Value>;
    fn mcp_connections(&self) -> &BTreeMap<String, String>;
    fn welcome_message(&self) -> Option<&str>;
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
}

fn non_empty_value(value: Option<&Value>) -> Option<Value> {
    let value = value?;
    let empty = match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    (!empty).then(|| value.clone())
}

/// Tail slice of `history` holding at most `count` entries (at least one).
pub fn message_tail(history: &[ChatMessage], count: usize) -> &[ChatMessage] {
    let count = count.max(1);
    &history[history.len().saturating_sub(count)..]
}

/// Copy the selected, non-empty values out of `source`.
///
/// Selected fields with nothing to share are dropped silently. Fails only
/// when nothing ends up in the payload.
pub fn assemble(selection: &ShareSelection, source: &dyn SourceState) -> Result<SharePayload> {
    if selection.is_empty() {
        return Err(ShareError::EmptySelection);
    }

    let mut payload = SharePayload::default();
    if selection.base_url {
        payload.base_url = non_blank(source.base_url());
    }
    if selection.api_key {
        payload.api_key = non_blank(source.api_key());
    }
    if selection.model {
        payload.model = non_blank(source.model());
    }
    if selection.messages {
        let tail = message_tail(source.messages(), selection.message_count);
        if !tail.is_empty() {
            payload.messages = Some(tail.to_vec());
        }
    }
    if selection.prompt_library {
        payload.prompt_library = non_empty_value(source.prompt_library());
    }
    if selection.function_library {
        payload.function_library = non_empty_value(source.function_library());
    }
    if selection.mcp_connections {
        let connections = source.mcp_connections();
        if !connections.is_empty() {
            payload.mcp_connections = Some(connections.clone());
        }
    }
    if selection.welcome_message {
        payload.welcome_message = non_blank(source.welcome_message());
    }

    if payload.is_empty() {
        return Err(ShareError::EmptySelection);
    }
    Ok(payload)
}
