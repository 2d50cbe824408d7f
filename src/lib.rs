//! Password-protected configuration links.
//!
//! A chosen subset of the chat session (model, credentials, conversation
//! tail, libraries, MCP secrets) is encrypted and carried in the URL
//! fragment `#shared=...`, which browsers never send to a server.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod estimate;
pub mod payload;
pub mod session;
pub mod state;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use crypto::Envelope;
pub use error::ShareError;
pub use estimate::LinkEstimate;
pub use payload::{ChatMessage, Role, ShareField, SharePayload, ShareSelection, SourceState};
pub use session::{
    ApplyTarget, ConsumeOutcome, KeyState, PasswordPrompt, PromptRequest, QueuedPrompt,
    SessionKeyContext, SessionKeyCoordinator,
};
pub use state::{ChatState, StateStore};

/// Predicted link length for `selection`, recomputed on every change.
///
/// An empty selection still yields the fixed overhead so a length bar can
/// be drawn.
pub fn estimate_length(
    selection: &ShareSelection,
    source: &dyn SourceState,
    config: &Config,
) -> LinkEstimate {
    let base = estimate::base_link_length(&config.page_url);
    let payload = payload::assemble(selection, source).unwrap_or_default();
    LinkEstimate::new(
        estimate::estimate(&payload, base),
        config.max_link_length,
        config.qr_max_length,
    )
}

/// Build a link for `selection` with the coordinator's session key rules.
pub async fn generate_link(
    coordinator: &mut SessionKeyCoordinator,
    selection: &ShareSelection,
    source: &dyn SourceState,
    config: &Config,
    password: Option<&str>,
    remember: bool,
) -> Result<String, ShareError> {
    coordinator
        .generate_link(selection, source, &config.page_url, password, remember)
        .await
}

/// Apply the configuration carried by `url`, prompting when needed.
pub async fn consume_incoming_link<P>(
    coordinator: &mut SessionKeyCoordinator,
    url: &str,
    prompt: &mut P,
    target: &mut dyn ApplyTarget,
) -> Result<ConsumeOutcome, ShareError>
where
    P: PasswordPrompt + ?Sized,
{
    coordinator.consume_incoming_link(url, prompt, target).await
}
