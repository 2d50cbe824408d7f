//! Remembered session key and the generate/consume flows built on it.
//!
//! The key lives in memory only. It is never written to disk and never
//! embedded in a generated link.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{self, Envelope};
use crate::envelope::{build_link, decode, encode, parse_link};
use crate::error::{Result, ShareError};
use crate::payload::{ChatMessage, ShareField, SharePayload, ShareSelection, SourceState, assemble};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Empty,
    Locked,
}

/// Shared secret remembered for the current application session.
#[derive(Default)]
pub struct SessionKeyContext {
    secret: Option<Zeroizing<String>>,
    locked: bool,
}

impl SessionKeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> KeyState {
        match (&self.secret, self.locked) {
            (Some(_), true) => KeyState::Locked,
            _ => KeyState::Empty,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state() == KeyState::Locked
    }

    /// The remembered secret, when locked
    pub fn secret(&self) -> Option<&str> {
        if self.locked {
            self.secret.as_ref().map(|s| s.as_str())
        } else {
            None
        }
    }

    pub fn lock(&mut self, secret: impl Into<String>) -> Result<()> {
        let secret = Zeroizing::new(secret.into());
        if secret.trim().is_empty() {
            return Err(ShareError::EmptyPassword);
        }
        self.secret = Some(secret);
        self.locked = true;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.secret = None;
        self.locked = false;
    }
}

impl fmt::Debug for SessionKeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyContext")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("locked", &self.locked)
            .finish()
    }
}

/// What the prompt should show for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub attempt: u32,
    /// Inline error from the previous attempt
    pub error: Option<ShareError>,
}

/// Interactive password source for incoming links.
#[async_trait]
pub trait PasswordPrompt: Send {
    /// `None` means the user cancelled.
    async fn request_password(&mut self, request: &PromptRequest) -> Option<String>;
}

/// Prompt that hands out a fixed list of answers, then cancels.
#[derive(Default)]
pub struct QueuedPrompt {
    answers: VecDeque<String>,
    last_error: Option<ShareError>,
    asked: u32,
}

impl QueuedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            last_error: None,
            asked: 0,
        }
    }

    /// Error reported with the most recent request
    pub fn last_error(&self) -> Option<&ShareError> {
        self.last_error.as_ref()
    }

    pub fn times_asked(&self) -> u32 {
        self.asked
    }
}

impl fmt::Debug for QueuedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedPrompt")
            .field("remaining", &self.answers.len())
            .field("asked", &self.asked)
            .finish()
    }
}

#[async_trait]
impl PasswordPrompt for QueuedPrompt {
    async fn request_password(&mut self, request: &PromptRequest) -> Option<String> {
        self.asked += 1;
        self.last_error = request.error.clone();
        self.answers.pop_front()
    }
}

/// Destination for fields recovered from an incoming link.
pub trait ApplyTarget {
    fn set_base_url(&mut self, value: String);
    fn set_api_key(&mut self, value: String);
    fn set_model(&mut self, value: String);
    fn set_messages(&mut self, value: Vec<ChatMessage>);
    fn set_prompt_library(&mut self, value: Value);
    fn set_function_library(&mut self, value: Value);
    fn set_mcp_connections(&mut self, value: BTreeMap<String, String>);
    fn set_welcome_message(&mut self, value: String);
    /// Drop `#shared=...` from the visible address
    fn clear_fragment(&mut self);
    fn notify_applied(&mut self, field: ShareField);
}

/// Push every present field into `target`, then clear the fragment and
/// notify once per field.
pub fn apply_payload(payload: SharePayload, target: &mut dyn ApplyTarget) -> Vec<ShareField> {
    let applied = payload.fields();
    let SharePayload {
        base_url,
        api_key,
        model,
        messages,
        prompt_library,
        function_library,
        mcp_connections,
        welcome_message,
    } = payload;

    if let Some(v) = base_url {
        target.set_base_url(v);
    }
    if let Some(v) = api_key {
        target.set_api_key(v);
    }
    if let Some(v) = model {
        target.set_model(v);
    }
    if let Some(v) = messages {
        target.set_messages(v);
    }
    if let Some(v) = prompt_library {
        target.set_prompt_library(v);
    }
    if let Some(v) = function_library {
        target.set_function_library(v);
    }
    if let Some(v) = mcp_connections {
        target.set_mcp_connections(v);
    }
    if let Some(v) = welcome_message {
        target.set_welcome_message(v);
    }

    target.clear_fragment();
    for field in &applied {
        target.notify_applied(*field);
    }
    applied
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordSource {
    SessionKey,
    Prompt,
}

/// Outcome of resolving a password for an incoming envelope
#[derive(Debug)]
pub struct Resolved {
    pub payload: SharePayload,
    pub source: PasswordSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// URL has no `#shared=` fragment
    NoSharedData,
    Applied(Vec<ShareField>),
    /// User gave up; nothing was changed
    Cancelled,
}

/// Owns the session key and drives link generation and consumption.
#[derive(Debug)]
pub struct SessionKeyCoordinator {
    context: SessionKeyContext,
    iterations: u32,
}

impl SessionKeyCoordinator {
    pub fn new(iterations: u32) -> Self {
        Self {
            context: SessionKeyContext::new(),
            iterations,
        }
    }

    pub fn context(&self) -> &SessionKeyContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionKeyContext {
        &mut self.context
    }

    /// Password for an outgoing share: the remembered secret when locked,
    /// otherwise the supplied one, which must not be blank.
    pub fn outgoing_password(&self, supplied: Option<&str>) -> Result<Zeroizing<String>> {
        if let Some(secret) = self.context.secret() {
            return Ok(Zeroizing::new(secret.to_string()));
        }
        match supplied {
            Some(p) if !p.trim().is_empty() => Ok(Zeroizing::new(p.to_string())),
            _ => Err(ShareError::EmptyPassword),
        }
    }

    /// Assemble, encrypt and encode a link for `page_url`.
    pub async fn generate_link(
        &mut self,
        selection: &ShareSelection,
        source: &dyn SourceState,
        page_url: &str,
        password: Option<&str>,
        remember: bool,
    ) -> Result<String> {
        let payload = assemble(selection, source)?;
        let password = self.outgoing_password(password)?;
        let fields = payload.fields();

        let envelope =
            crypto::encrypt_async(payload, password.as_str().to_string(), self.iterations).await?;
        let link = build_link(page_url, &encode(&envelope));

        if remember && !self.context.is_locked() {
            self.context.lock(password.as_str())?;
        }
        info!(?fields, length = link.len(), "generated shared link");
        Ok(link)
    }

    /// Open `envelope`, trying the remembered secret before prompting.
    ///
    /// A remembered secret that fails is left in place. Wrong or blank
    /// prompt answers are reported inline and asked again until the prompt
    /// cancels (`Ok(None)`).
    pub async fn resolve_password<P>(
        &mut self,
        envelope: &Envelope,
        prompt: &mut P,
    ) -> Result<Option<Resolved>>
    where
        P: PasswordPrompt + ?Sized,
    {
        if let Some(secret) = self.context.secret() {
            match crypto::decrypt_async(envelope.clone(), secret.to_string()).await {
                Ok(payload) => {
                    return Ok(Some(Resolved {
                        payload,
                        source: PasswordSource::SessionKey,
                    }));
                }
                Err(ShareError::WrongPasswordOrCorrupted) => {
                    debug!("session key does not open this link, prompting");
                }
                Err(e) => return Err(e),
            }
        }

        let mut request = PromptRequest {
            attempt: 1,
            error: None,
        };
        loop {
            let Some(answer) = prompt.request_password(&request).await else {
                info!(attempts = request.attempt - 1, "password prompt cancelled");
                return Ok(None);
            };
            let answer = Zeroizing::new(answer);
            match crypto::decrypt_async(envelope.clone(), answer.as_str().to_string()).await {
                Ok(payload) => {
                    if !self.context.is_locked() {
                        self.context.lock(answer.as_str())?;
                    }
                    return Ok(Some(Resolved {
                        payload,
                        source: PasswordSource::Prompt,
                    }));
                }
                Err(e) if e.is_retryable() => {
                    request = PromptRequest {
                        attempt: request.attempt + 1,
                        error: Some(e),
                    };
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Parse, decrypt and apply an incoming link.
    pub async fn consume_incoming_link<P>(
        &mut self,
        url: &str,
        prompt: &mut P,
        target: &mut dyn ApplyTarget,
    ) -> Result<ConsumeOutcome>
    where
        P: PasswordPrompt + ?Sized,
    {
        let Some(encoded) = parse_link(url) else {
            return Ok(ConsumeOutcome::NoSharedData);
        };
        let envelope = decode(encoded)?;

        let Some(resolved) = self.resolve_password(&envelope, prompt).await? else {
            return Ok(ConsumeOutcome::Cancelled);
        };
        let applied = apply_payload(resolved.payload, target);
        info!(?applied, source = ?resolved.source, "applied shared configuration");
        Ok(ConsumeOutcome::Applied(applied))
    }
}
