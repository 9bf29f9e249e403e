use std::fs;
use std::io::ErrorKind::NotFound;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use log::LevelFilter;
use serde_derive::Deserialize;

use crate::serial::data::InvalidUtf8;
use crate::serial::PortSettings;

pub const CONFIG_PATH: &str = "config.toml";

/// The serial port of the radio.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/tty.usbserial-A6006Q7P";
/// The file the serial output is saved to.
pub const DEFAULT_OUTPUT_FILE: &str = "output.txt";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub acquire: ConfigAcquire,
    pub logging: ConfigLogging,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConfigAcquire {
    pub serial_port: String,
    pub baud_rate: u32,
    pub output_file: PathBuf,
    pub poll_interval_ms: u64,
    pub invalid_utf8: InvalidUtf8,
}

impl Default for ConfigAcquire {
    fn default() -> ConfigAcquire {
        ConfigAcquire {
            serial_port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            invalid_utf8: InvalidUtf8::default(),
        }
    }
}

impl ConfigAcquire {
    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            path: self.serial_port.clone(),
            baud_rate: self.baud_rate,
            // A zero timeout would turn the blocking read into a busy loop
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConfigLogging {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for ConfigLogging {
    fn default() -> ConfigLogging {
        ConfigLogging {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ConfigLogging {
    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        self.level
            .parse::<LevelFilter>()
            .map_err(|_| anyhow::anyhow!("Unknown log level: {}", self.level))
    }
}

pub fn parse_config(text: &str) -> anyhow::Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(text).context("Unable to parse the config file")?;
    config.logging.level_filter()?;
    Ok(config)
}

/// Loads `path`, falling back to the built-in defaults when it does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<ConfigFile> {
    let config_contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == NotFound => return Ok(ConfigFile::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("Unable to open the config file: {}", path.display()))
        }
    };

    parse_config(&config_contents)
}
