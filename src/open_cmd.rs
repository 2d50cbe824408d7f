//! `sharelink open`: decrypt an incoming link and apply it to local state.

use anyhow::{Result, bail};
use async_trait::async_trait;
use dialoguer::{Confirm, Password, theme::ColorfulTheme};
use tracing::warn;

use sharelink::{
    Config, ConsumeOutcome, PasswordPrompt, PromptRequest, QueuedPrompt, SessionKeyCoordinator,
    StateStore, consume_incoming_link,
};

/// Terminal password prompt; a blank answer offers to cancel.
struct TerminalPrompt {
    theme: ColorfulTheme,
    /// Set when the terminal could not be read, so the caller can tell it
    /// apart from a user cancel
    failure: Option<String>,
}

impl TerminalPrompt {
    fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
            failure: None,
        }
    }

    fn settle(&mut self, read: dialoguer::Result<Option<String>>) -> Option<String> {
        match read {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "password prompt failed");
                self.failure = Some(err.to_string());
                None
            }
        }
    }
}

#[async_trait]
impl PasswordPrompt for TerminalPrompt {
    async fn request_password(&mut self, request: &PromptRequest) -> Option<String> {
        if let Some(err) = &request.error {
            eprintln!("\x1b[31m{err}\x1b[0m (leave blank to cancel)");
        }
        let theme = &self.theme;
        let read = tokio::task::block_in_place(|| -> dialoguer::Result<Option<String>> {
            let answer = Password::with_theme(theme)
                .with_prompt("Password for shared link")
                .allow_empty_password(true)
                .interact()?;
            if answer.is_empty() {
                let cancel = Confirm::with_theme(theme)
                    .with_prompt("Cancel opening this link?")
                    .default(true)
                    .interact()?;
                if cancel {
                    return Ok(None);
                }
            }
            Ok(Some(answer))
        });
        self.settle(read)
    }
}

pub async fn run(
    url: &str,
    session_key: Option<String>,
    password: Option<String>,
    config: &Config,
) -> Result<()> {
    let store = StateStore::open_default()?;
    let mut state = store.load()?;
    state.current_url = Some(url.to_string());

    let mut coordinator = SessionKeyCoordinator::new(config.kdf_iterations);
    if let Some(key) = session_key {
        coordinator.context_mut().lock(key)?;
    }

    let outcome = match password {
        Some(password) => {
            let mut prompt = QueuedPrompt::new([password]);
            let outcome =
                consume_incoming_link(&mut coordinator, url, &mut prompt, &mut state).await?;
            if outcome == ConsumeOutcome::Cancelled {
                if let Some(err) = prompt.last_error() {
                    bail!("{err}");
                }
            }
            outcome
        }
        None => {
            let mut prompt = TerminalPrompt::new();
            let outcome =
                consume_incoming_link(&mut coordinator, url, &mut prompt, &mut state).await?;
            if outcome == ConsumeOutcome::Cancelled {
                if let Some(failure) = prompt.failure {
                    bail!("could not read password: {failure}");
                }
            }
            outcome
        }
    };

    match outcome {
        ConsumeOutcome::NoSharedData => {
            println!("No shared configuration in this link.");
        }
        ConsumeOutcome::Cancelled => {
            println!("Cancelled; nothing was changed.");
        }
        ConsumeOutcome::Applied(_) => {
            store.save(&state)?;
            for notice in &state.notices {
                println!("{notice}");
            }
            if let Some(current) = &state.current_url {
                println!("Open {current} to continue.");
            }
        }
    }
    Ok(())
}
