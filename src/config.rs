//! Configuration of the engine and of logging.

use std::{
    env, fmt,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use log::LevelFilter;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, de};

#[cfg(unix)]
use syslog::Facility;

use crate::constants::{
    P11STORE_ENV_LOG_LEVEL, P11STORE_ENV_LOG_TYPE, PKCS11_ENV_MODULE_PATH,
};


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    pub fn module_path() -> Option<PathBuf> {
        env::var_os(PKCS11_ENV_MODULE_PATH)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    pub fn log_level() -> LevelFilter {
        match env::var(P11STORE_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        P11STORE_ENV_LOG_LEVEL
                    );
                    LevelFilter::Warn
                }
            },
            _ => LevelFilter::Warn,
        }
    }

    pub fn log_type() -> LogType {
        match env::var(P11STORE_ENV_LOG_TYPE) {
            Ok(log_type) => match LogType::from_str(&log_type) {
                Ok(log_type) => log_type,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log type in env var {}",
                        P11STORE_ENV_LOG_TYPE
                    );
                    LogType::Stderr
                }
            },
            _ => LogType::Stderr,
        }
    }

    pub fn syslog_facility() -> String {
        "user".to_string()
    }
}


//------------ Config --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    /// The PKCS#11 module used when a URI doesn't name one.
    #[serde(
        default = "ConfigDefaults::module_path",
        deserialize_with = "crate::ext_serde::de_module_path"
    )]
    pub module_path: Option<PathBuf>,

    /// The PIN used when a URI doesn't provide one.
    #[serde(default)]
    pub pin: Option<SecretString>,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "crate::ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    pub log_file: Option<PathBuf>,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            module_path: ConfigDefaults::module_path(),
            pin: None,
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: None,
            syslog_facility: ConfigDefaults::syslog_facility(),
        }
    }
}

impl Config {
    /// Reads the config from a TOML file.
    pub fn read_config(path: &Path) -> Result<Self, ConfigError> {
        let mut v = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut v)?;
        Self::parse_str(&v)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.verify()?;
        Ok(config)
    }

    fn verify(&self) -> Result<(), ConfigError> {
        if self.log_type == LogType::File && self.log_file.is_none() {
            return Err(ConfigError::other(
                "log_file not configured with log_type = \"file\"",
            ));
        }
        Ok(())
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => match self.log_file.as_ref() {
                Some(path) => self.file_logger(path),
                None => Err(ConfigError::other(
                    "log_file not configured with log_type = \"file\"",
                )),
            },
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|e| {
            ConfigError::Other(format!(
                "Failed to init stderr logging: {}",
                e
            ))
        })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = fern::log_file(path).map_err(|e| {
            ConfigError::Other(format!(
                "Failed to open log file '{}': {}",
                path.display(),
                e
            ))
        })?;
        self.fern_logger().chain(file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {}", e))
        })
    }

    /// Creates a syslog logger.
    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let facility = Facility::from_str(&self.syslog_facility)
            .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("p11store"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            })
            .map_err(|e| {
                ConfigError::Other(format!("Cannot connect to syslog: {}", e))
            })?;
        self.fern_logger().chain(logger).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init syslog: {}", e))
        })
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is not supported on this platform"))
    }

    /// Creates and returns a fern logger.
    fn fern_logger(&self) -> fern::Dispatch {
        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;

        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{}\"",
                s
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        LogType::from_str(&string).map_err(de::Error::custom)
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl ConfigError {
    pub fn other(s: impl fmt::Display) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::parse_str(
            r#"
            module_path = "/usr/lib/softhsm/libsofthsm2.so"
            pin = "1234"
            log_level = "debug"
            log_type = "file"
            log_file = "/var/log/p11store.log"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.module_path,
            Some(PathBuf::from("/usr/lib/softhsm/libsofthsm2.so"))
        );
        assert_eq!(
            config.pin.as_ref().map(|pin| pin.expose_secret().as_str()),
            Some("1234")
        );
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_type, LogType::File);
        assert_eq!(config.syslog_facility, "user");
    }

    #[test]
    fn file_logging_needs_file() {
        let res = Config::parse_str(
            r#"
            module_path = "/usr/lib/p11.so"
            log_type = "file"
            "#,
        );
        assert!(matches!(res, Err(ConfigError::Other(_))));
    }

    #[test]
    fn reject_unknown_log_type() {
        let res = Config::parse_str("log_type = \"journal\"");
        assert!(matches!(res, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn read_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "module_path = \"/opt/p11.so\"").unwrap();
        writeln!(file, "log_level = \"trace\"").unwrap();
        let config = Config::read_config(file.path()).unwrap();
        assert_eq!(config.module_path, Some(PathBuf::from("/opt/p11.so")));
        assert_eq!(config.log_level, LevelFilter::Trace);
        assert!(config.pin.is_none());
    }

    #[test]
    fn missing_config_file() {
        let res = Config::read_config(Path::new("/nonexistent/p11store.conf"));
        assert!(matches!(res, Err(ConfigError::IoError(_))));
    }
}
