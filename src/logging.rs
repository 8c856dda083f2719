//! log4rs setup for evaluation runs.
use crate::error::ConfigError;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Handle;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`
    pub level: String,
    /// Also write to this file when set
    pub file: Option<PathBuf>,
    pub pattern: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            pattern: "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}".to_string(),
        }
    }
}

impl LogConfig {
    /// # Errors
    /// If `level` is not a log level.
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.level).map_err(|_| ConfigError::Invalid {
            field: "log.level",
            reason: format!("unknown level {:?}", self.level),
        })
    }

    /// # Errors
    /// Unknown level, an unwritable log file, or an invalid appender setup.
    pub fn build(&self) -> Result<Config, ConfigError> {
        let level = self.level_filter()?;
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(&self.pattern)))
            .build();
        let mut builder =
            Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
        let mut root = Root::builder().appender("stdout");
        if let Some(path) = &self.file {
            let logfile = FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(&self.pattern)))
                .build(path)?;
            builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
            root = root.appender("logfile");
        }
        builder
            .build(root.build(level))
            .map_err(|err| ConfigError::Logging(err.to_string()))
    }
}

/// Installs the global logger. Fails if one is already installed.
///
/// # Errors
/// See [`LogConfig::build`].
pub fn init_logging(config: &LogConfig) -> Result<Handle, ConfigError> {
    log4rs::init_config(config.build()?).map_err(|err| ConfigError::Logging(err.to_string()))
}
