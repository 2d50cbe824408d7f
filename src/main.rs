use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sharelink::{
    Config, LinkEstimate, SessionKeyCoordinator, ShareField, ShareSelection, StateStore,
    estimate_length, generate_link,
};

mod open_cmd;

#[derive(Parser)]
#[command(name = "sharelink", version, about = "Password-protected chat configuration links")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict the link length for a selection
    #[command(name = "estimate")]
    Estimate {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Encrypt the selected settings into a link
    #[command(name = "generate")]
    Generate {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Link password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Page the link opens (default from ~/.sharelink/config.toml)
        #[arg(long)]
        page_url: Option<String>,
    },

    /// Decrypt a link and apply its settings
    #[command(name = "open")]
    Open {
        url: String,
        /// Remembered team key, tried before prompting
        #[arg(long)]
        session_key: Option<String>,
        /// Non-interactive password
        #[arg(long)]
        password: Option<String>,
    },

    /// Inspect the local chat state
    #[command(name = "state")]
    State {
        #[command(subcommand)]
        action: Option<StateAction>,
    },

    /// View or modify config (~/.sharelink/config.toml)
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Args, Debug, Default)]
struct SelectionArgs {
    #[arg(long)]
    base_url: bool,
    #[arg(long)]
    api_key: bool,
    #[arg(long)]
    model: bool,
    /// Include the last N messages (default from config)
    #[arg(long, value_name = "N", num_args = 0..=1)]
    messages: Option<Option<usize>>,
    #[arg(long)]
    prompt_library: bool,
    #[arg(long)]
    function_library: bool,
    /// Include MCP connection secrets
    #[arg(long)]
    mcp: bool,
    #[arg(long)]
    welcome: bool,
    /// Select every field
    #[arg(long)]
    all: bool,
}

impl SelectionArgs {
    fn to_selection(&self, default_message_count: usize) -> ShareSelection {
        let message_count = self
            .messages
            .flatten()
            .unwrap_or(default_message_count)
            .max(1);
        if self.all {
            return ShareSelection::all(message_count);
        }
        let mut selection = ShareSelection {
            message_count,
            ..Default::default()
        };
        let flags = [
            (ShareField::BaseUrl, self.base_url),
            (ShareField::ApiKey, self.api_key),
            (ShareField::Model, self.model),
            (ShareField::Messages, self.messages.is_some()),
            (ShareField::PromptLibrary, self.prompt_library),
            (ShareField::FunctionLibrary, self.function_library),
            (ShareField::McpConnections, self.mcp),
            (ShareField::WelcomeMessage, self.welcome),
        ];
        for (field, on) in flags {
            selection.set(field, on);
        }
        selection
    }
}

#[derive(Subcommand)]
enum StateAction {
    /// Show local state with secrets masked
    Show,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current config
    Show,
    /// Set a config value
    Set {
        /// Key to set (page_url, max_link_length, qr_max_length, kdf_iterations, default_message_count)
        key: String,
        /// Value to set
        value: String,
    },
    /// Reset config to defaults
    Reset,
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SHARELINK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Estimate { selection } => {
            let config = Config::load().unwrap_or_default();
            let state = StateStore::open_default()?.load()?;
            let selection = selection.to_selection(config.default_message_count);
            let estimate = estimate_length(&selection, &state, &config);
            println!("estimated length: {} / {} bytes", estimate.bytes, estimate.max);
            println!("{}", length_bar(&estimate, 30));
            print_warnings(&estimate);
        }
        Commands::Generate {
            selection,
            password,
            page_url,
        } => {
            let mut config = Config::load().unwrap_or_default();
            if let Some(url) = page_url {
                config.page_url = url;
            }
            let state = StateStore::open_default()?.load()?;
            let selection = selection.to_selection(config.default_message_count);
            let estimate = estimate_length(&selection, &state, &config);
            print_warnings(&estimate);

            let password = match password {
                Some(p) => p,
                None => prompt_new_password()?,
            };
            let mut coordinator = SessionKeyCoordinator::new(config.kdf_iterations);
            let link = generate_link(
                &mut coordinator,
                &selection,
                &state,
                &config,
                Some(password.as_str()),
                false,
            )
            .await?;

            // Only the link goes to stdout so it can be piped
            println!("{link}");
        }
        Commands::Open {
            url,
            session_key,
            password,
        } => {
            let config = Config::load().unwrap_or_default();
            open_cmd::run(&url, session_key, password, &config).await?;
        }
        Commands::State { action } => match action {
            None | Some(StateAction::Show) => {
                let store = StateStore::open_default()?;
                let state = store.load()?;
                println!("# {}", store.path().display());
                println!("{}", serde_json::to_string_pretty(&state.redacted())?);
            }
        },
        Commands::Config { action } => {
            handle_config(action)?;
        }
    }
    Ok(())
}

fn prompt_new_password() -> Result<String> {
    use dialoguer::{Password, theme::ColorfulTheme};
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Link password")
        .with_confirmation("Repeat password", "Passwords do not match")
        .interact()?;
    Ok(password)
}

fn length_bar(estimate: &LinkEstimate, width: usize) -> String {
    let filled = (estimate.fill_ratio() * width as f64).round() as usize;
    format!(
        "[{}{}] {:.0}%",
        "#".repeat(filled),
        ".".repeat(width - filled),
        estimate.fill_ratio() * 100.0
    )
}

fn print_warnings(estimate: &LinkEstimate) {
    if estimate.exceeds_max() {
        eprintln!(
            "\x1b[33mwarning: link is about {} bytes, over the {} byte limit; some browsers and chat apps will truncate it\x1b[0m",
            estimate.bytes, estimate.max
        );
    } else if !estimate.fits_qr() {
        eprintln!(
            "\x1b[33mnote: link is too long for a QR code (> {} bytes)\x1b[0m",
            estimate.qr_max
        );
    }
}

fn handle_config(action: Option<ConfigAction>) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let config = Config::load().unwrap_or_default();
            println!("page_url = \"{}\"", config.page_url);
            println!("max_link_length = {}", config.max_link_length);
            println!("qr_max_length = {}", config.qr_max_length);
            println!("kdf_iterations = {}", config.kdf_iterations);
            println!("default_message_count = {}", config.default_message_count);
        }
        Some(ConfigAction::Set { key, value }) => {
            let mut config = Config::load().unwrap_or_default();
            config.set(&key, &value)?;
            let path = config.save()?;
            println!("saved to {}", path.display());
        }
        Some(ConfigAction::Reset) => {
            let config = Config::default();
            let path = config.save()?;
            println!("reset to defaults at {}", path.display());
        }
    }
    Ok(())
}
