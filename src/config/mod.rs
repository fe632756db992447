//! Configuration and session credential storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ACK_TIMEOUT_SECS: u64 = 10;

/// Who the local user is in the conversation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    #[default]
    Customer,
    Admin,
}

/// How new messages reach the client.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Periodic full reload over HTTP.
    #[default]
    Poll,
    /// Socket.IO channel with server-pushed messages.
    Push,
}

/// Resolved role, with the conversation owner for admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin { user_id: u64 },
}

impl Role {
    /// Whether `is_admin` marks a message written by the other side.
    pub fn is_counterpart(&self, is_admin: bool) -> bool {
        match self {
            Role::Customer => is_admin,
            Role::Admin { .. } => !is_admin,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storefront origin, e.g. `https://shop.example`
    pub base_url: String,
    /// Django session cookie value (`sessionid`)
    pub session_id: Option<String>,
    /// CSRF token (`csrftoken` cookie, echoed in `X-CSRFToken`)
    pub csrf_token: Option<String>,
    pub role: RoleKind,
    /// Customer whose conversation is shown. Required for admins; for
    /// customers it scopes the channel to a room.
    pub room_user_id: Option<u64>,
    pub mode: DeliveryMode,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub ack_timeout_secs: u64,
    /// Canned answers offered in the compose box
    pub quick_replies: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            session_id: None,
            csrf_token: None,
            role: RoleKind::default(),
            room_user_id: None,
            mode: DeliveryMode::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            ack_timeout_secs: DEFAULT_ACK_TIMEOUT_SECS,
            quick_replies: Vec::new(),
        }
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "support-chat", "support-chat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get default config file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from `path`, or the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to `path`, or the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the session cookie)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(path)
    }

    /// Resolve the role, checking that admins name a conversation.
    pub fn role(&self) -> Result<Role> {
        match self.role {
            RoleKind::Customer => Ok(Role::Customer),
            RoleKind::Admin => match self.room_user_id {
                Some(user_id) if user_id > 0 => Ok(Role::Admin { user_id }),
                _ => bail!("Admin role needs room_user_id. Run 'support-chat configure --room-user-id N'."),
            },
        }
    }

    /// Check everything a session needs before it starts.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url '{}'", self.base_url))?;
        if self.session_id.is_none() {
            bail!("No session cookie configured. Run 'support-chat configure --session-id ...' first.");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        self.role()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}
