use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::crypto::{DEFAULT_ITERATIONS, MAX_ITERATIONS, MIN_ITERATIONS};
use crate::estimate::{DEFAULT_MAX_LINK_LENGTH, DEFAULT_QR_MAX_LENGTH};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Page the generated links open
    #[serde(default = "default_page_url")]
    pub page_url: String,

    /// Hard warning threshold for link length
    #[serde(default = "default_max_link_length")]
    pub max_link_length: usize,

    /// Largest link still rendered as a QR code
    #[serde(default = "default_qr_max_length")]
    pub qr_max_length: usize,

    /// PBKDF2 rounds for new links
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Trailing messages shared when --messages has no count
    #[serde(default = "default_message_count")]
    pub default_message_count: usize,
}

fn default_page_url() -> String {
    "https://chat.example.com/app.html".to_string()
}

fn default_max_link_length() -> usize {
    DEFAULT_MAX_LINK_LENGTH
}

fn default_qr_max_length() -> usize {
    DEFAULT_QR_MAX_LENGTH
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_message_count() -> usize {
    10
}

/// `$SHARELINK_HOME`, or `~/.sharelink`
pub fn sharelink_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SHARELINK_HOME") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME not set")?;
    Ok(PathBuf::from(home).join(".sharelink"))
}

fn config_path() -> Result<PathBuf> {
    Ok(sharelink_home()?.join("config.toml"))
}

impl Config {
    /// Load config from disk, returning defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = config_path()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Set a single key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "page_url" | "url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    bail!("invalid page_url: must start with http:// or https://");
                }
                self.page_url = value.to_string();
            }
            "max_link_length" => {
                self.max_link_length = parse_positive(key, value)?;
            }
            "qr_max_length" => {
                self.qr_max_length = parse_positive(key, value)?;
            }
            "kdf_iterations" | "iterations" => {
                let iterations: u32 = value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid kdf_iterations: {value}"))?;
                if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
                    bail!(
                        "invalid kdf_iterations: must be between {MIN_ITERATIONS} and {MAX_ITERATIONS}"
                    );
                }
                self.kdf_iterations = iterations;
            }
            "default_message_count" | "messages" => {
                self.default_message_count = parse_positive(key, value)?;
            }
            _ => bail!("unknown config key: {key}"),
        }
        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("invalid {key}: must be a positive integer"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_url: default_page_url(),
            max_link_length: default_max_link_length(),
            qr_max_length: default_qr_max_length(),
            kdf_iterations: default_kdf_iterations(),
            default_message_count: default_message_count(),
        }
    }
}
