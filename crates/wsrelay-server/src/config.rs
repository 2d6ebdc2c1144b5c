//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use wsrelay_core::{ChannelMode, RelayError, RelayResult, DEFAULT_CHANNEL_COUNT};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub channels: ChannelSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret every publisher must present.
    #[serde(default)]
    pub key: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            key: None,
        }
    }
}

/// `single` or `multi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    Single,
    Multi,
}

/// `[channels]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    #[serde(default = "default_mode")]
    pub mode: ModeSetting,
    #[serde(default = "default_channel_count")]
    pub count: usize,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            count: default_channel_count(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    3000
}
fn default_mode() -> ModeSetting {
    ModeSetting::Multi
}
fn default_channel_count() -> usize {
    DEFAULT_CHANNEL_COUNT
}

/// Values given on the command line; `None` means "use the file".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub key: Option<String>,
    pub single: bool,
    pub channels: Option<usize>,
}

/// Resolved server configuration (CLI overrides applied, mode validated).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub key: String,
    pub mode: ChannelMode,
}

impl ServerConfig {
    /// Load config from a TOML file (defaults if absent), then apply CLI
    /// overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, cli)
    }

    /// Merge a parsed file with CLI overrides.
    pub fn resolve(file_config: ConfigFile, cli: CliOverrides) -> RelayResult<Self> {
        let port = cli.port.unwrap_or(file_config.server.port);
        if port == 0 {
            return Err(RelayError::InvalidConfiguration(
                "port must be non-zero".into(),
            ));
        }

        let key = cli
            .key
            .or(file_config.server.key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                RelayError::InvalidConfiguration(
                    "a shared key is required (--key, WSRELAY_KEY, or [server].key)".into(),
                )
            })?;

        let mode = if cli.single {
            ChannelMode::Single
        } else if let Some(count) = cli.channels {
            ChannelMode::multi(count)?
        } else {
            match file_config.channels.mode {
                ModeSetting::Single => ChannelMode::Single,
                ModeSetting::Multi => ChannelMode::multi(file_config.channels.count)?,
            }
        };

        Ok(Self {
            bind: cli.bind.unwrap_or(file_config.server.bind),
            port,
            key,
            mode,
        })
    }
}

fn parse(content: &str) -> RelayResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| RelayError::InvalidConfiguration(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key() -> CliOverrides {
        CliOverrides {
            key: Some("secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::resolve(ConfigFile::default(), with_key()).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.bind, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(cfg.mode, ChannelMode::Multi(25));
        assert_eq!(cfg.key, "secret");
    }

    #[test]
    fn parse_toml_config() {
        let file = parse(
            r#"
[server]
bind = "127.0.0.1"
port = 9000
key = "from-file"

[channels]
mode = "multi"
count = 8
"#,
        )
        .unwrap();
        let cfg = ServerConfig::resolve(file, CliOverrides::default()).unwrap();
        assert_eq!(cfg.bind, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.key, "from-file");
        assert_eq!(cfg.mode, ChannelMode::Multi(8));
    }

    #[test]
    fn single_mode_from_file() {
        let file = parse("[channels]\nmode = \"single\"\n").unwrap();
        let cfg = ServerConfig::resolve(file, with_key()).unwrap();
        assert_eq!(cfg.mode, ChannelMode::Single);
    }

    #[test]
    fn cli_overrides_file() {
        let file = parse("[server]\nport = 9000\nkey = \"file\"\n").unwrap();
        let cli = CliOverrides {
            port: Some(9100),
            key: Some("cli".into()),
            channels: Some(4),
            ..Default::default()
        };
        let cfg = ServerConfig::resolve(file, cli).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.key, "cli");
        assert_eq!(cfg.mode, ChannelMode::Multi(4));
    }

    #[test]
    fn missing_key_is_invalid() {
        let err = ServerConfig::resolve(ConfigFile::default(), CliOverrides::default());
        assert!(matches!(err, Err(RelayError::InvalidConfiguration(_))));

        let empty = CliOverrides {
            key: Some(String::new()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), empty).is_err());
    }

    #[test]
    fn zero_channels_is_invalid() {
        let file = parse("[channels]\ncount = 0\n").unwrap();
        assert!(matches!(
            ServerConfig::resolve(file, with_key()),
            Err(RelayError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_port_is_invalid() {
        let cli = CliOverrides {
            port: Some(0),
            ..with_key()
        };
        assert!(ServerConfig::resolve(ConfigFile::default(), cli).is_err());
    }

    #[test]
    fn bad_toml_is_invalid() {
        assert!(matches!(
            parse("[channels]\ncount = -1\n"),
            Err(RelayError::InvalidConfiguration(_))
        ));
        assert!(parse("not = [valid").is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = ServerConfig::load(
            Some(Path::new("/nonexistent/wsrelay/config.toml")),
            with_key(),
        )
        .unwrap();
        assert_eq!(cfg.port, 3000);
    }
}
