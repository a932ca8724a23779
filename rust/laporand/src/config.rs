use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Which persistence backend this process runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Remote,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

pub const DEFAULT_ROSTER: [&str; 9] = [
    "X TKJ 1", "X TKJ 2", "X TKJ 3", "XI TKJ 1", "XI TKJ 2", "XI TKJ 3", "XII TKJ 1",
    "XII TKJ 2", "XII TKJ 3",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Realtime database root, e.g. `https://<project>.firebaseio.com`.
    pub database_url: String,
    pub storage_bucket: String,
    pub storage_url: String,
    pub auth_token: Option<String>,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            storage_bucket: String::new(),
            storage_url: "https://firebasestorage.googleapis.com/v0".to_string(),
            auth_token: None,
            poll_interval_ms: 2_000,
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub max_failed_logins: u32,
    pub lockout_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_logins: 5,
            lockout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendKind,
    pub workspace: Option<PathBuf>,
    /// Admin sign-in is disabled while this is unset.
    pub admin_password: Option<String>,
    /// Classes checked by the daily duty coverage view.
    pub roster: Vec<String>,
    pub max_photo_bytes: usize,
    pub remote: RemoteConfig,
    pub security: SecurityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            workspace: None,
            admin_password: None,
            roster: DEFAULT_ROSTER.iter().map(|s| s.to_string()).collect(),
            max_photo_bytes: 5 * 1024 * 1024,
            remote: RemoteConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Values given on the command line or through the environment. They win
/// over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<BackendKind>,
    pub workspace: Option<PathBuf>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn apply(&mut self, o: Overrides) {
        if let Some(b) = o.backend {
            self.backend = b;
        }
        if o.workspace.is_some() {
            self.workspace = o.workspace;
        }
        if o.admin_password.is_some() {
            self.admin_password = o.admin_password;
        }
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: &str| {
            errors.push(ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            })
        };

        if self.backend == BackendKind::Remote {
            if self.remote.database_url.trim().is_empty() {
                push("remote.database_url", "required for the remote backend");
            }
            if self.remote.storage_bucket.trim().is_empty() {
                push("remote.storage_bucket", "required for the remote backend");
            }
            if self.remote.poll_interval_ms == 0 {
                push("remote.poll_interval_ms", "must be greater than zero");
            }
        }
        if self.roster.is_empty() {
            push("roster", "must list at least one class");
        }
        let mut seen = HashSet::new();
        for class in &self.roster {
            if class.trim().is_empty() {
                push("roster", "class names must not be empty");
            } else if !seen.insert(class.as_str()) {
                push("roster", &format!("duplicate class {:?}", class));
            }
        }
        if self.max_photo_bytes == 0 {
            push("max_photo_bytes", "must be greater than zero");
        }
        if self.admin_password.as_deref() == Some("") {
            push("admin_password", "must not be empty when set");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
