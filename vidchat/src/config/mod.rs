//! Configuration system for the `vidchat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/vidchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::chat::SessionConfig;
use crate::poll::PollConfig;
use crate::sync::http::HttpConfig;

/// Backend address used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The backend URL is not an absolute `http(s)` URL.
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A setting is out of range.
    #[error("invalid setting `{key}`: {reason}")]
    Invalid {
        /// Dotted key of the setting, e.g. `poll.max_interval_ms`.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    poll: PollFileConfig,
    session: SessionFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    request_timeout_ms: Option<u64>,
    upload_timeout_ms: Option<u64>,
    email: Option<String>,
}

/// `[poll]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PollFileConfig {
    initial_interval_ms: Option<u64>,
    max_interval_ms: Option<u64>,
    backoff_threshold: Option<u32>,
    max_hard_failures: Option<u32>,
    fetch_timeout_ms: Option<u64>,
    stop_on_bot_reply: Option<bool>,
    server_since_filter: Option<bool>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    event_buffer: Option<usize>,
    title_max_chars: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Backend connection settings.
    pub http: HttpConfig,
    /// Account to sign in with, if any.
    pub email: Option<String>,
    /// Password for `email`. Never read from the config file.
    pub password: Option<String>,
    /// Run against the in-process demo backend instead of `http`.
    pub offline: bool,

    // -- Session --
    /// Session and poll tunables.
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if any resolved value fails validation.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let raw_url = cli
            .base_url
            .as_deref()
            .or(file.server.base_url.as_deref())
            .unwrap_or(DEFAULT_BASE_URL);
        let http_defaults = HttpConfig::new(parse_base_url(raw_url)?);
        let http = HttpConfig {
            request_timeout: file
                .server
                .request_timeout_ms
                .map_or(http_defaults.request_timeout, Duration::from_millis),
            upload_timeout: file
                .server
                .upload_timeout_ms
                .map_or(http_defaults.upload_timeout, Duration::from_millis),
            base_url: http_defaults.base_url,
        };

        let session_defaults = SessionConfig::default();
        let poll_defaults = &session_defaults.poll;
        let poll = PollConfig {
            initial_interval: cli
                .poll_interval_ms
                .or(file.poll.initial_interval_ms)
                .map_or(poll_defaults.initial_interval, Duration::from_millis),
            max_interval: file
                .poll
                .max_interval_ms
                .map_or(poll_defaults.max_interval, Duration::from_millis),
            backoff_threshold: file
                .poll
                .backoff_threshold
                .unwrap_or(poll_defaults.backoff_threshold),
            max_hard_failures: file
                .poll
                .max_hard_failures
                .unwrap_or(poll_defaults.max_hard_failures),
            fetch_timeout: file
                .poll
                .fetch_timeout_ms
                .map_or(poll_defaults.fetch_timeout, Duration::from_millis),
            stop_on_bot_reply: cli.stop_on_bot_reply
                || file
                    .poll
                    .stop_on_bot_reply
                    .unwrap_or(poll_defaults.stop_on_bot_reply),
            server_since_filter: file
                .poll
                .server_since_filter
                .unwrap_or(poll_defaults.server_since_filter),
        };
        validate_poll(&poll)?;

        let session = SessionConfig {
            poll,
            event_buffer: file
                .session
                .event_buffer
                .unwrap_or(session_defaults.event_buffer),
            title_max_chars: file
                .session
                .title_max_chars
                .unwrap_or(session_defaults.title_max_chars),
        };
        if session.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "session.event_buffer",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            http,
            email: cli.email.clone().or_else(|| file.server.email.clone()),
            password: cli.password.clone(),
            offline: cli.offline,
            session,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Chat client for the video-analysis assistant")]
pub struct CliArgs {
    /// Backend root URL.
    #[arg(long, env = "VIDCHAT_URL")]
    pub base_url: Option<String>,

    /// Account email for sign-in.
    #[arg(long, env = "VIDCHAT_EMAIL")]
    pub email: Option<String>,

    /// Account password for sign-in.
    #[arg(long, env = "VIDCHAT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Path to config file (default: `~/.config/vidchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use the built-in demo backend; no server needed.
    #[arg(long)]
    pub offline: bool,

    /// Initial poll interval in milliseconds.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Stop polling once the assistant has replied.
    #[arg(long)]
    pub stop_on_bot_reply: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "VIDCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/vidchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(invalid("not an absolute URL".to_string()));
    }
    Ok(url)
}

fn validate_poll(poll: &PollConfig) -> Result<(), ConfigError> {
    if poll.initial_interval.is_zero() {
        return Err(ConfigError::Invalid {
            key: "poll.initial_interval_ms",
            reason: "must be at least 1".to_string(),
        });
    }
    if poll.initial_interval > poll.max_interval {
        return Err(ConfigError::Invalid {
            key: "poll.max_interval_ms",
            reason: format!(
                "{}ms is below the initial interval of {}ms",
                poll.max_interval.as_millis(),
                poll.initial_interval.as_millis()
            ),
        });
    }
    if poll.backoff_threshold == 0 {
        return Err(ConfigError::Invalid {
            key: "poll.backoff_threshold",
            reason: "must be at least 1".to_string(),
        });
    }
    if poll.max_hard_failures == 0 {
        return Err(ConfigError::Invalid {
            key: "poll.max_hard_failures",
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("vidchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
