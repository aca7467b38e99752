use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "growisync/0.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONFIG_FILENAME: &str = "growisync.toml";
pub const DEFAULT_STAGING_DIR: &str = "attachments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GrowisyncConfig {
    #[serde(default)]
    pub growi: GrowiSection,
    #[serde(default)]
    pub source: SourceSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GrowiSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub use_tls: Option<bool>,
    pub user: Option<String>,
    /// Prefer `GROWI_API_TOKEN` over committing the token to a file.
    pub api_token: Option<String>,
    pub timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub db_path: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
}

/// Values given on the command line; they win over env and file.
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub use_tls: bool,
    pub user: Option<String>,
}

/// Everything needed to reach one GROWI instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrowiClientConfig {
    pub host: String,
    pub port: Option<u16>,
    pub use_tls: bool,
    pub user: String,
    pub api_token: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl GrowiClientConfig {
    /// API root, e.g. `https://wiki.example.org:3000/_api`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{scheme}://{}:{port}/_api", self.host),
            None => format!("{scheme}://{}/_api", self.host),
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "base_url={}\nuser={}\napi_token={}\ntimeout_ms={}\nuser_agent={}",
            self.base_url(),
            self.user,
            if self.api_token.is_empty() {
                "<missing>"
            } else {
                "<redacted>"
            },
            self.timeout_ms,
            self.user_agent
        )
    }
}

impl GrowisyncConfig {
    pub fn client_config(&self, overrides: &ClientOverrides) -> Result<GrowiClientConfig> {
        self.client_config_with_lookup(overrides, |key| env::var(key).ok())
    }

    /// Resolve connection settings: flag > env > config file > default.
    pub fn client_config_with_lookup<F>(
        &self,
        overrides: &ClientOverrides,
        lookup_env: F,
    ) -> Result<GrowiClientConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let host = overrides
            .host
            .clone()
            .or_else(|| env_value("GROWI_HOST"))
            .or_else(|| self.growi.host.clone())
            .ok_or_else(|| anyhow::anyhow!("GROWI host is not configured (--host, GROWI_HOST or [growi].host)"))?;
        let user = overrides
            .user
            .clone()
            .or_else(|| env_value("GROWI_USER"))
            .or_else(|| self.growi.user.clone())
            .ok_or_else(|| anyhow::anyhow!("GROWI user is not configured (--user, GROWI_USER or [growi].user)"))?;
        let api_token = env_value("GROWI_API_TOKEN")
            .or_else(|| self.growi.api_token.clone())
            .ok_or_else(|| anyhow::anyhow!("GROWI API token is not configured (GROWI_API_TOKEN or [growi].api_token)"))?;

        let port = match overrides.port {
            Some(port) => Some(port),
            None => match env_value("GROWI_PORT") {
                Some(value) => Some(
                    value
                        .parse::<u16>()
                        .with_context(|| format!("invalid GROWI_PORT: {value}"))?,
                ),
                None => self.growi.port,
            },
        };
        let use_tls = overrides.use_tls
            || env_value("GROWI_USE_TLS")
                .map(|value| parse_flag(&value))
                .transpose()?
                .or(self.growi.use_tls)
                .unwrap_or(false);
        let timeout_ms = match env_value("GROWI_HTTP_TIMEOUT_MS") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("invalid GROWI_HTTP_TIMEOUT_MS: {value}"))?,
            None => self.growi.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        };
        let user_agent = env_value("GROWI_USER_AGENT")
            .or_else(|| self.growi.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        if host.contains("://") {
            bail!("GROWI host must be a bare host name, got {host}");
        }

        Ok(GrowiClientConfig {
            host,
            port,
            use_tls,
            user,
            api_token,
            timeout_ms,
            user_agent,
        })
    }

    /// Knowledge database path: flag > env KNOWLEDGE_DB_PATH > config.
    pub fn source_db_path<F>(&self, flag: Option<&Path>, lookup_env: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = flag {
            return Some(path.to_path_buf());
        }
        if let Some(value) = lookup_env("KNOWLEDGE_DB_PATH") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        self.source.db_path.clone()
    }

    /// Directory attachment bytes are staged in before upload.
    pub fn staging_dir<F>(&self, lookup_env: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup_env("GROWISYNC_STAGING_DIR") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
        self.source
            .staging_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR))
    }
}

/// Config file location: flag > GROWISYNC_CONFIG > `./growisync.toml`.
pub fn resolve_config_path<F>(flag: Option<&Path>, cwd: &Path, lookup_env: F) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return (absolutize(path, cwd), ValueSource::Flag);
    }
    if let Some(value) = lookup_env("GROWISYNC_CONFIG") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return (absolutize(Path::new(trimmed), cwd), ValueSource::Env);
        }
    }
    (cwd.join(DEFAULT_CONFIG_FILENAME), ValueSource::Default)
}

/// Load and parse a config file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<GrowisyncConfig> {
    if !config_path.exists() {
        return Ok(GrowisyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: GrowisyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("invalid boolean value: {value}"),
    }
}
