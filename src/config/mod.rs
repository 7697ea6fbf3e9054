//! CLI arguments and file-backed settings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mediated shell: translate, screen, approve, execute, repair"
)]
pub struct Config {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Simulate execution without running anything
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Reduce console output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable auto-repair of failed commands at startup
    #[arg(long, global = true)]
    pub auto_repair: bool,

    /// Subcommand; without one, the interactive terminal starts
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Translate a natural-language request and mediate its execution
    Ask {
        /// The request, as free text
        #[arg(trailing_var_arg = true, required = true)]
        request: Vec<String>,
    },
    /// Repair a failing command from its error output
    Fix {
        /// The command that failed
        #[arg(long)]
        cmd: String,
        /// Its error output (stderr)
        #[arg(long)]
        err: String,
        /// Optional intent to guide the fix
        #[arg(long, default_value = "")]
        intent: String,
    },
    /// Line-based interactive prompt (no PTY)
    Repl,
    /// Serve mediation decisions over a local Unix socket
    Daemon {
        /// Socket path override
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Language-model settings
    #[serde(default)]
    pub llm: LlmSettings,

    /// Interactive terminal settings
    #[serde(default)]
    pub terminal: TerminalSettings,

    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonSettings,
}

/// Language-model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Timeout for one translation call in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry once with a schema reminder when the model answers in prose
    #[serde(default = "default_strict_json")]
    pub strict_json: bool,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    crate::translate::DEFAULT_TIMEOUT_SECS
}

fn default_strict_json() -> bool {
    true
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            strict_json: default_strict_json(),
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// API key comes from the environment only, never the config file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var("OPENAI_API_KEY").ok()
    }
}

/// Interactive terminal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    /// Shell command to proxy
    #[serde(default = "default_shell")]
    pub shell: Vec<String>,

    /// Bound on retained output context lines
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    /// Offer fixes automatically when a command fails
    #[serde(default)]
    pub auto_repair: bool,

    /// Ask run/cancel/edit/replan before injecting a fix
    #[serde(default = "default_interactive_repair")]
    pub interactive_repair: bool,
}

fn default_shell() -> Vec<String> {
    vec![
        "bash".to_string(),
        "--noprofile".to_string(),
        "--norc".to_string(),
    ]
}

fn default_context_lines() -> usize {
    100
}

fn default_interactive_repair() -> bool {
    true
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            context_lines: default_context_lines(),
            auto_repair: false,
            interactive_repair: default_interactive_repair(),
        }
    }
}

/// Daemon settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Socket path override; derived from the user identity when unset
    #[serde(default)]
    pub socket: Option<PathBuf>,
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {:?}", p))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", p));
            }
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("shellward/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/shellward/config.toml")),
            dirs::home_dir().map(|p| p.join(".shellward.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path));
            }
        }

        Ok(Self::default())
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if cli.auto_repair {
            self.terminal.auto_repair = true;
        }
    }

    /// Merge environment overrides (environment takes precedence over file)
    pub fn merge_env(&mut self) {
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            if !base.is_empty() {
                self.llm.api_base = base;
            }
        }
    }

    /// Validate and normalize settings values
    pub fn validate(&mut self) {
        const MIN_TIMEOUT_SECS: u64 = 1;
        const MIN_CONTEXT_LINES: usize = 10;

        if self.llm.timeout_secs < MIN_TIMEOUT_SECS {
            self.llm.timeout_secs = MIN_TIMEOUT_SECS;
        }
        if self.terminal.context_lines < MIN_CONTEXT_LINES {
            self.terminal.context_lines = MIN_CONTEXT_LINES;
        }
        if self.terminal.shell.is_empty() {
            self.terminal.shell = default_shell();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert_eq!(settings.llm.timeout_secs, 30);
        assert!(settings.llm.strict_json);
        assert_eq!(settings.terminal.shell[0], "bash");
        assert_eq!(settings.terminal.context_lines, 100);
        assert!(!settings.terminal.auto_repair);
        assert!(settings.terminal.interactive_repair);
        assert!(settings.daemon.socket.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [llm]
            model = "gpt-4o"
            timeout_secs = 10

            [terminal]
            auto_repair = true
            context_lines = 50
        "#;

        let settings: Settings = toml::from_str(toml).expect("Should parse TOML");
        assert_eq!(settings.llm.model, "gpt-4o");
        assert_eq!(settings.llm.timeout_secs, 10);
        assert!(settings.terminal.auto_repair);
        assert_eq!(settings.terminal.context_lines, 50);
        // Unspecified sections keep their defaults.
        assert_eq!(settings.llm.api_base, "https://api.openai.com/v1");
    }

    #[test]
    fn test_validate_clamps_minimums() {
        let mut settings = Settings::default();
        settings.llm.timeout_secs = 0;
        settings.terminal.context_lines = 1;
        settings.terminal.shell.clear();
        settings.validate();

        assert_eq!(settings.llm.timeout_secs, 1);
        assert_eq!(settings.terminal.context_lines, 10);
        assert!(!settings.terminal.shell.is_empty());
    }

    #[test]
    fn test_merge_env_overrides_model() {
        temp_env::with_var("OPENAI_MODEL", Some("gpt-4.1-mini"), || {
            let mut settings = Settings::default();
            settings.merge_env();
            assert_eq!(settings.llm.model, "gpt-4.1-mini");
        });
    }
}
