//! Local chat-client state: the settings, conversation and connection
//! stores that links are built from and applied to.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::sharelink_home;
use crate::envelope::strip_shared_fragment;
use crate::payload::{ChatMessage, ShareField, SourceState};
use crate::session::ApplyTarget;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub prompt_library: Option<Value>,
    #[serde(default)]
    pub function_library: Option<Value>,
    #[serde(default)]
    pub mcp_connections: BTreeMap<String, String>,
    #[serde(default)]
    pub welcome_message: Option<String>,
    /// Address currently shown for the app
    #[serde(default)]
    pub current_url: Option<String>,
    /// Notices produced while applying a shared link
    #[serde(skip)]
    pub notices: Vec<String>,
}

impl SourceState for ChatState {
    fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn prompt_library(&self) -> Option<&Value> {
        self.prompt_library.as_ref()
    }

    fn function_library(&self) -> Option<&Value> {
        self.function_library.as_ref()
    }

    fn mcp_connections(&self) -> &BTreeMap<String, String> {
        &self.mcp_connections
    }

    fn welcome_message(&self) -> Option<&str> {
        self.welcome_message.as_deref()
    }
}

impl ApplyTarget for ChatState {
    fn set_base_url(&mut self, value: String) {
        self.base_url = Some(value);
    }

    fn set_api_key(&mut self, value: String) {
        self.api_key = Some(value);
    }

    fn set_model(&mut self, value: String) {
        self.model = Some(value);
    }

    fn set_messages(&mut self, value: Vec<ChatMessage>) {
        self.messages = value;
    }

    fn set_prompt_library(&mut self, value: Value) {
        self.prompt_library = Some(value);
    }

    fn set_function_library(&mut self, value: Value) {
        self.function_library = Some(value);
    }

    fn set_mcp_connections(&mut self, value: BTreeMap<String, String>) {
        self.mcp_connections.extend(value);
    }

    fn set_welcome_message(&mut self, value: String) {
        self.welcome_message = Some(value);
    }

    fn clear_fragment(&mut self) {
        if let Some(url) = &self.current_url {
            self.current_url = Some(strip_shared_fragment(url).to_string());
        }
    }

    fn notify_applied(&mut self, field: ShareField) {
        let notice = match field {
            ShareField::Messages => format!(
                "{} restored ({} messages)",
                field.display_name(),
                self.messages.len()
            ),
            ShareField::McpConnections => format!(
                "{} imported ({} total)",
                field.display_name(),
                self.mcp_connections.len()
            ),
            _ => format!("{} applied", field.display_name()),
        };
        self.notices.push(notice);
    }
}

impl ChatState {
    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.api_key = copy.api_key.as_deref().map(mask_secret);
        for secret in copy.mcp_connections.values_mut() {
            *secret = mask_secret(secret);
        }
        copy
    }
}

/// Keep a short prefix so keys stay recognisable.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(3).collect();
    if secret.chars().count() <= 6 {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}

/// JSON-file backed `ChatState`
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at `$SHARELINK_HOME/state.json`
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(sharelink_home()?.join("state.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ChatState> {
        if !self.path.exists() {
            return Ok(ChatState::default());
        }
        let content = fs::read_to_string(&self.path).context("Failed to read state file")?;
        let state: ChatState = serde_json::from_str(&content).context("Failed to parse state file")?;
        Ok(state)
    }

    pub fn save(&self, state: &ChatState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, format!("{content}\n")).context("Failed to write state file")?;
        Ok(())
    }
}
