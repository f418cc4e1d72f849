use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

// ── Retries ───────────────────────────────────────────────────────────────────

/// Attempts per model call site. 1 means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retries {
    pub turn: u32,
    pub plan: u32,
    pub step: u32,
    pub codebase: u32,
    pub command_analysis: u32,
    pub image_analysis: u32,
}

impl Default for Retries {
    fn default() -> Self {
        Self {
            turn: 1,
            plan: 1,
            step: 1,
            codebase: 1,
            command_analysis: 1,
            image_analysis: 3,
        }
    }
}

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// OpenAI-compatible base URL, including the version path (e.g. ".../v1")
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Optional API key (sent as Bearer token)
    pub api_key: Option<String>,
    /// Whole-request timeout for a model call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub retries: Retries,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    8192
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "qwen3:14b".to_string(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            temperature: None,
            max_output_tokens: default_max_output_tokens(),
            retries: Retries::default(),
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    /// Where projects, chats and logs live. Defaults to the XDG data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Resolve the active profile given an optional override name.
    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_output_tokens: u32,
    pub retries: Retries,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
    pub data_dir: PathBuf,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
        model_override: Option<&str>,
        api_key_override: Option<&str>,
    ) -> Self {
        let profile_name = profile_override
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(profile_override)
            .cloned()
            .unwrap_or_default();

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            model: model_override.map(str::to_string).unwrap_or(base.model),
            api_key: api_key_override.map(str::to_string).or(base.api_key),
            timeout_secs: base.timeout_secs,
            temperature: base.temperature,
            max_output_tokens: base.max_output_tokens,
            retries: base.retries,
            profile_name,
            data_dir: file.data_dir.clone().unwrap_or_else(default_data_dir),
        }
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn chats_dir(&self) -> PathBuf {
        self.data_dir.join("chats")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("projwright")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
        .unwrap_or_else(|| PathBuf::from("."))
        .join("projwright")
}

fn xdg_dir(var: &str, home_relative: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(home_relative))
        })
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# projwright configuration
# Run `projwright --init` to regenerate this file.

default_profile = "local"

# data_dir = "/home/me/projwright"   # projects/, chats/ and logs/ live here

# ── Local Ollama (default) ────────────────────────────────────────────────────
[profiles.local]
endpoint      = "http://localhost:11434/v1"
model         = "qwen3:14b"
timeout_secs  = 120
# api_key is not needed for Ollama

# Attempts per model call (1 = no retry)
[profiles.local.retries]
turn             = 1
plan             = 1
step             = 1
codebase         = 1
command_analysis = 1
image_analysis   = 3

# ── OpenAI ───────────────────────────────────────────────────────────────────
# [profiles.openai]
# endpoint          = "https://api.openai.com/v1"
# model             = "gpt-4o"
# api_key           = "sk-..."
# temperature       = 0.2
# max_output_tokens = 8192

# ── OpenRouter ────────────────────────────────────────────────────────────────
# [profiles.openrouter]
# endpoint = "https://openrouter.ai/api/v1"
# model    = "qwen/qwen-2.5-coder-32b-instruct"
# api_key  = "sk-or-..."
"#;
