//! Tool settings
//!
//! Settings come from an optional TOML file. Every field has a default, so an
//! empty or missing file yields a working configuration. CLI flags override
//! individual values per invocation.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Read when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/heyhy/config.toml";

// ============================================================================
// Domain Check Policy
// ============================================================================

/// What to do when the domain does not resolve to this host.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DomainCheck {
    /// Abort the install
    Strict,
    /// Log a warning and continue
    #[default]
    Warn,
    /// Skip the lookup entirely
    Off,
}

impl fmt::Display for DomainCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainCheck::Strict => write!(f, "strict"),
            DomainCheck::Warn => write!(f, "warn"),
            DomainCheck::Off => write!(f, "off"),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Settings parsed from the TOML file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Working directory of the managed service, default "/home/hysteria2"
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Container image, default "metacubex/mihomo:latest"
    #[serde(default = "default_image")]
    pub image: String,

    /// certbot config directory, default "/etc/letsencrypt"
    #[serde(default = "default_letsencrypt_dir")]
    pub letsencrypt_dir: PathBuf,

    /// Site served to probes that fail authentication
    #[serde(default = "default_masquerade")]
    pub masquerade: String,

    /// Port tried first when none is fixed
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Start of the fallback port range (inclusive)
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// End of the fallback port range (exclusive)
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    #[serde(default)]
    pub domain_check: DomainCheck,

    /// Services answering with the caller's public IP as plain text, tried in order
    #[serde(default = "default_ip_services")]
    pub ip_services: Vec<String>,

    /// Attempts for `docker compose pull` before giving up
    #[serde(default = "default_pull_attempts")]
    pub pull_attempts: u32,
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/home/hysteria2")
}

fn default_image() -> String {
    "metacubex/mihomo:latest".to_string()
}

fn default_letsencrypt_dir() -> PathBuf {
    PathBuf::from("/etc/letsencrypt")
}

fn default_masquerade() -> String {
    "https://cocodataset.org/".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_port_range_start() -> u16 {
    41670
}

fn default_port_range_end() -> u16 {
    46990
}

fn default_ip_services() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://ifconfig.me/ip".to_string(),
        "https://icanhazip.com".to_string(),
    ]
}

fn default_pull_attempts() -> u32 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            image: default_image(),
            letsencrypt_dir: default_letsencrypt_dir(),
            masquerade: default_masquerade(),
            default_port: default_port(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            domain_check: DomainCheck::default(),
            ip_services: default_ip_services(),
            pull_attempts: default_pull_attempts(),
        }
    }
}

impl Settings {
    /// Parse settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        settings.workdir = expand_tilde(&settings.workdir);
        settings.letsencrypt_dir = expand_tilde(&settings.letsencrypt_dir);
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`, or from [`DEFAULT_CONFIG_PATH`] if it
    /// exists, or fall back to defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !tokio::fs::try_exists(&default).await.unwrap_or(false) {
                    debug!("No settings file at {}, using defaults", DEFAULT_CONFIG_PATH);
                    return Ok(Self::default());
                }
                default
            }
        };

        debug!("Loading settings from {}", path.display());
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::file(&path, e))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::Config("`image` must not be empty".into()));
        }
        if self.default_port == 0 {
            return Err(Error::Config("`default_port` must not be 0".into()));
        }
        if self.port_range_start == 0 || self.port_range_start >= self.port_range_end {
            return Err(Error::Config(format!(
                "invalid port range {}..{}",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.pull_attempts == 0 {
            return Err(Error::Config("`pull_attempts` must be at least 1".into()));
        }
        check_http_url("masquerade", &self.masquerade)?;
        for service in &self.ip_services {
            check_http_url("ip_services", service)?;
        }
        Ok(())
    }

    /// Fallback port range
    pub fn port_range(&self) -> Range<u16> {
        self.port_range_start..self.port_range_end
    }
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value)
        .map_err(|e| Error::Config(format!("`{}`: invalid URL `{}`: {}", field, value, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "`{}`: `{}` is not an http(s) URL",
            field, value
        )));
    }
    Ok(())
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.workdir, PathBuf::from("/home/hysteria2"));
        assert_eq!(settings.port_range(), 41670..46990);
        assert_eq!(settings.domain_check, DomainCheck::Warn);
        assert_eq!(settings.pull_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_toml(
            r#"
workdir = "/srv/hy2"
image = "metacubex/mihomo:v1.19.0"
domain_check = "strict"
port_range_start = 50000
port_range_end = 50100
"#,
        )
        .unwrap();
        assert_eq!(settings.workdir, PathBuf::from("/srv/hy2"));
        assert_eq!(settings.image, "metacubex/mihomo:v1.19.0");
        assert_eq!(settings.domain_check, DomainCheck::Strict);
        assert_eq!(settings.port_range(), 50000..50100);
        assert_eq!(settings.default_port, 443);
    }

    #[test]
    fn test_rejects_bad_range() {
        let err =
            Settings::from_toml("port_range_start = 5000\nport_range_end = 4000\n").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("port range")));
    }

    #[test]
    fn test_rejects_bad_masquerade() {
        assert!(Settings::from_toml("masquerade = \"ftp://example.com\"\n").is_err());
        assert!(Settings::from_toml("masquerade = \"not a url\"\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_policy() {
        assert!(Settings::from_toml("domain_check = \"maybe\"\n").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/hy2"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expanded, PathBuf::from(home).join("hy2"));
        }
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "pull_attempts = 5\n").await.unwrap();
        let settings = Settings::load(Some(&path)).await.unwrap();
        assert_eq!(settings.pull_attempts, 5);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Settings::load(Some(&missing)).await,
            Err(Error::File { .. })
        ));
    }
}
