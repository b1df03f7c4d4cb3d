//! Server configuration: TOML file + CLI overrides.

use crate::session::shell::{default_candidates, ShellCandidate};
use crate::session::{ReaderSettings, SessionConfig, WindowSize};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use webterm_core::{TermError, TermResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub terminal: TerminalSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[terminal]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_candidates")]
    pub shells: Vec<ShellCandidate>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            rows: default_rows(),
            cols: default_cols(),
            term: default_term(),
            read_chunk: default_read_chunk(),
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            cwd: None,
            shells: default_candidates(),
            env: HashMap::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5050
}
fn default_buffer_size() -> usize {
    crate::session::replay_buffer::DEFAULT_REPLAY_BUFFER_SIZE
}
fn default_rows() -> u16 {
    webterm_core::DEFAULT_ROWS
}
fn default_cols() -> u16 {
    webterm_core::DEFAULT_COLS
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_read_chunk() -> usize {
    4096
}
fn default_poll_timeout_ms() -> u64 {
    50
}
fn default_idle_sleep_ms() -> u64 {
    10
}
fn default_error_backoff_ms() -> u64 {
    500
}
fn default_stop_timeout_ms() -> u64 {
    1000
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Tried before the configured shells, without a startup line.
    pub shell: Option<PathBuf>,
    pub buffer_size: Option<usize>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub session: SessionConfig,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> TermResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        file_config.resolve(cli)
    }
}

/// Parse the TOML text of a config file.
pub fn parse_config(content: &str) -> TermResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| TermError::Config(format!("config parse error: {e}")))
}

impl ConfigFile {
    /// Merge CLI overrides and validate.
    pub fn resolve(self, cli: CliOverrides) -> TermResult<ServerConfig> {
        let terminal = self.terminal;
        if terminal.rows == 0 || terminal.cols == 0 {
            return Err(TermError::Config(format!(
                "terminal size must be non-zero, got {}x{}",
                terminal.rows, terminal.cols
            )));
        }
        if terminal.read_chunk == 0 {
            return Err(TermError::Config("read_chunk must be non-zero".into()));
        }

        let mut shells = terminal.shells;
        if let Some(shell) = cli.shell {
            shells.insert(0, ShellCandidate { path: shell, startup: None });
        }
        for shell in &mut shells {
            shell.path = expand_tilde(&shell.path);
        }
        if shells.is_empty() {
            return Err(TermError::Config("no shells configured".into()));
        }

        let session = SessionConfig {
            buffer_size: cli.buffer_size.unwrap_or(terminal.buffer_size),
            initial_size: WindowSize::new(terminal.rows, terminal.cols),
            term: terminal.term,
            shells,
            env: terminal.env,
            cwd: terminal.cwd.as_deref().map(expand_tilde_str),
            reader: ReaderSettings {
                chunk_size: terminal.read_chunk,
                poll_timeout: Duration::from_millis(terminal.poll_timeout_ms),
                idle_sleep: Duration::from_millis(terminal.idle_sleep_ms),
                error_backoff: Duration::from_millis(terminal.error_backoff_ms),
            },
            stop_timeout: Duration::from_millis(terminal.stop_timeout_ms),
        };

        Ok(ServerConfig {
            host: cli.host.unwrap_or(self.server.host),
            port: cli.port.unwrap_or(self.server.port),
            session,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
