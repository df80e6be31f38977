use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config {0}: {1}")]
    ReadFailed(path::PathBuf, #[source] io::Error),
    #[error("Failed to write config {0}: {1}")]
    WriteFailed(path::PathBuf, #[source] io::Error),
    #[error("Failed to parse config {0}: {1}")]
    ParseFailed(path::PathBuf, #[source] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No config path available: set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: Storage,
    pub probe: Probe,
    pub schedule: Schedule,
    pub logging: Logging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// Flat JSON record set shared with other writers
    pub services_file: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    /// Local `HH:MM` of the daily check of every service
    pub daily_check: String,
    pub daily_check_enabled: bool,
    /// How often the daemon re-reads the record set
    pub sync_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    /// `compact`, `pretty` or `json`
    pub format: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self { services_file: path::PathBuf::from("config/services.json") }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            user_agent: concat!("uptime-service/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self { daily_check: "09:00".into(), daily_check_enabled: true, sync_interval_seconds: 30 }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uppe/monitor.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uppe/monitor.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Monitor Configuration:")?;
        write_title_1(f, "Storage")?;
        write_1(f, "Services File", &self.storage.services_file.display())?;
        write_title_1(f, "Probe")?;
        write_1(f, "Timeout (s)", &self.probe.timeout_seconds)?;
        write_1(f, "User Agent", &self.probe.user_agent)?;
        write_title_1(f, "Schedule")?;
        let daily: &dyn fmt::Display =
            if self.schedule.daily_check_enabled { &self.schedule.daily_check } else { &"disabled" };
        write_1(f, "Daily Check", daily)?;
        write_1(f, "Sync Interval (s)", &self.schedule.sync_interval_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uppe/monitor.toml
    ///  or the specified path (with a .toml extension) if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path = Self::resolve_path(optional_path)?;

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|err| Error::ReadFailed(config_path.clone(), err))?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::ParseFailed(config_path, err))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// File a config is read from: the given path with a .toml extension, or
    /// the default location
    pub fn resolve_path(optional_path: Option<impl AsRef<path::Path>>) -> Result<path::PathBuf, Error> {
        match optional_path {
            Some(path) => Ok(normalize_toml_path(path.as_ref())),
            None => default_config_path(),
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::WriteFailed(parent.to_path_buf(), err))?;
        }

        fs::write(path, config_str).map_err(|err| Error::WriteFailed(path.to_path_buf(), err))
    }
}
