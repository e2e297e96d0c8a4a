//! INI configuration loading.
//!
//! Mirrors the original app's config file shape: one `[general]` section
//! plus one `[channel.<name>]` section per speaker channel. Channels are
//! sorted by ascending `priority` and assigned indices `0..N` in that
//! order, so the highest-priority channel ends up with the highest index
//! (and therefore wins the mixer's high-to-low selection sweep).

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot open config file: {0}")]
    CannotOpen(String),

    #[error("malformed config: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub token: String,
    pub power_port: String,
    pub audio_device: Option<String>,
    pub warming: Duration,
    pub cooling: Duration,
    /// Channel names in ascending-priority order (index 0 = lowest priority).
    pub channels: Vec<String>,
}

impl Config {
    pub fn from_ini(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ini = ini::Ini::load_from_file(path)
            .map_err(|e| ConfigError::CannotOpen(format!("{}: {e}", path.display())))?;

        let general = ini
            .section(Some("general"))
            .ok_or_else(|| ConfigError::Malformed("missing [general] section".into()))?;

        let port = general
            .get("port")
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|e| ConfigError::Malformed(format!("invalid port: {e}")))?;

        let token = general
            .get("token")
            .ok_or_else(|| ConfigError::Malformed("missing general.token".into()))?
            .to_string();

        let power_port = general
            .get("power-port")
            .ok_or_else(|| ConfigError::Malformed("missing general.power-port".into()))?
            .to_string();

        let audio_device = general
            .get("audio-device")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let warming = parse_millis(general.get("warming-duration").unwrap_or("30000"))?;
        let cooling = parse_millis(general.get("cooling-duration").unwrap_or("5000"))?;

        let mut channels: Vec<ChannelConfig> = Vec::new();
        for (section, props) in ini.iter() {
            let Some(section) = section else { continue };
            let Some(name) = section.strip_prefix("channel.") else {
                continue;
            };
            let priority = props
                .get("priority")
                .ok_or_else(|| ConfigError::Malformed(format!("channel.{name} missing priority")))?
                .parse::<i64>()
                .map_err(|e| ConfigError::Malformed(format!("channel.{name} priority: {e}")))?;
            channels.push(ChannelConfig {
                name: name.to_string(),
                priority,
            });
        }
        channels.sort_by_key(|c| c.priority);

        if channels.is_empty() {
            return Err(ConfigError::Malformed("no [channel.*] sections found".into()));
        }

        Ok(Self {
            port,
            token,
            power_port,
            audio_device,
            warming,
            cooling,
            channels: channels.into_iter().map(|c| c.name).collect(),
        })
    }
}

fn parse_millis(value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::Malformed(format!("invalid duration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_ini(contents: &str) -> tempfile_path::TempIni {
        tempfile_path::TempIni::new(contents)
    }

    mod tempfile_path {
        use std::fs::File;
        use std::io::Write;
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub struct TempIni {
            pub path: PathBuf,
        }

        impl TempIni {
            pub fn new(contents: &str) -> Self {
                let n = COUNTER.fetch_add(1, Ordering::Relaxed);
                let mut path = std::env::temp_dir();
                path.push(format!("valve-pa-test-{}-{}.ini", std::process::id(), n));
                let mut file = File::create(&path).unwrap();
                file.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempIni {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn test_parses_channels_sorted_by_priority() {
        let ini = write_temp_ini(
            "[general]\nport=9000\ntoken=secret\npower-port=/dev/ttyUSB0\naudio-device=\nwarming-duration=1000\ncooling-duration=2000\n\n[channel.b]\npriority=2\n\n[channel.a]\npriority=1\n",
        );
        let config = Config::from_ini(&ini.path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.token, "secret");
        assert_eq!(config.channels, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(config.warming, Duration::from_millis(1000));
        assert_eq!(config.audio_device, None);
    }

    #[test]
    fn test_missing_channels_is_error() {
        let ini = write_temp_ini("[general]\ntoken=secret\npower-port=/dev/ttyUSB0\n");
        assert!(Config::from_ini(&ini.path).is_err());
    }

    #[test]
    fn test_default_port() {
        let ini = write_temp_ini(
            "[general]\ntoken=secret\npower-port=/dev/ttyUSB0\n\n[channel.a]\npriority=1\n",
        );
        let config = Config::from_ini(&ini.path).unwrap();
        assert_eq!(config.port, 8080);
    }
}
