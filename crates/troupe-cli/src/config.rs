use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use troupe_core::{default_roster, PersonaId, PersonaProfile, Roster};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TroupeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_coordinator")]
    pub coordinator: String,
    /// Rooms to attach to; empty means every room the client delivers.
    #[serde(default)]
    pub rooms: Vec<String>,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_coordinator() -> String {
    "master".to_string()
}

fn default_mailbox_capacity() -> usize {
    100
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_history_window() -> usize {
    10
}

fn default_bus_capacity() -> usize {
    64
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            coordinator: default_coordinator(),
            rooms: Vec::new(),
            mailbox_capacity: default_mailbox_capacity(),
            idle_timeout_secs: default_idle_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            history_window: default_history_window(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// Chat-server credential for this persona's identity.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".troupe")
}

impl TroupeConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `troupe init` first.",
                path.display()
            )
        })?;

        // Expand environment variables before parsing
        let expanded = expand_env_vars(&content);

        let config: Self = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        for persona in &config.personas {
            if !persona.token.is_empty() && !persona.token.contains("${") {
                warn!(
                    "Token for persona '{}' is hardcoded in the config file. For security, use environment variables: token = \"${{{}_TOKEN}}\"",
                    persona.id,
                    persona.id.to_uppercase()
                );
            }
        }

        Ok(config)
    }

    /// Build the persona roster. An empty persona list falls back to the
    /// built-in default team.
    pub fn roster(&self) -> Result<Roster> {
        if self.personas.is_empty() {
            return Ok(default_roster());
        }

        let mut profiles = Vec::with_capacity(self.personas.len());
        for persona in &self.personas {
            let prompt = match (&persona.system_prompt, &persona.system_prompt_file) {
                (Some(prompt), _) => prompt.clone(),
                (None, Some(file)) => std::fs::read_to_string(file).with_context(|| {
                    format!(
                        "Failed to read system prompt for '{}' at {}",
                        persona.id,
                        file.display()
                    )
                })?,
                (None, None) => format!("You are {}, a helpful team member.", persona.id),
            };

            let display_name = if persona.display_name.is_empty() {
                persona.id.clone()
            } else {
                persona.display_name.clone()
            };

            profiles.push(PersonaProfile::new(
                PersonaId::new(persona.id.as_str()),
                display_name,
                prompt,
            ));
        }

        Roster::new(profiles, PersonaId::new(self.gateway.coordinator.as_str()))
    }
}

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        if let Some(start) = result[pos..].find("${") {
            let abs_start = pos + start;
            if let Some(end) = result[abs_start..].find('}') {
                let var_name = result[abs_start + 2..abs_start + end].to_string();
                let value = std::env::var(&var_name).unwrap_or_default();
                let value_len = value.len();
                result = format!(
                    "{}{}{}",
                    &result[..abs_start],
                    value,
                    &result[abs_start + end + 1..]
                );
                pos = abs_start + value_len; // Skip past the expanded value
            } else {
                break;
            }
        } else {
            break;
        }
    }
    result
}
