use std::{borrow::Cow, fmt, io::IsTerminal, net::SocketAddr, path::PathBuf, str::FromStr};

use clap::{Parser, ValueEnum};
use config::{Config, PolicyMode};
use logforth::filter::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "Turnstile", version, long_about = concat!("Turnstile v", env!("CARGO_PKG_VERSION"), ", per-caller API rate limiting"))]
pub struct Args {
    /// IP address on which the server will listen for incoming connections.
    /// Default: 127.0.0.1:6000
    #[arg(short, long, env = "TURNSTILE_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
    /// Path to the TOML configuration file. A missing file means defaults.
    #[arg(long, short, env = "TURNSTILE_CONFIG_PATH", default_value = "./turnstile.toml")]
    pub config: PathBuf,
    /// Set the logging level.
    #[arg(long = "log", env = "TURNSTILE_LOG", default_value_t = LogLevel::default())]
    pub log_level: LogLevel,
    /// Set the style of log output
    #[arg(long, env = "TURNSTILE_LOG_STYLE", default_value_t = LogStyle::default())]
    pub log_style: LogStyle,
    /// Use the permissive policy table regardless of the configured mode.
    #[arg(long, env = "TURNSTILE_PERMISSIVE")]
    pub permissive: bool,
}

impl Args {
    pub fn config(&self) -> anyhow::Result<Config> {
        let mut config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            log::info!(
                "No configuration file at {}, using the default configuration",
                self.config.display()
            );

            Config::default()
        };

        if self.permissive && config.rate_limits.mode != PolicyMode::Permissive {
            log::info!("Permissive rate limits forced from the command line");
            config.rate_limits.mode = PolicyMode::Permissive;

            for warning in config.validate()? {
                log::warn!("{warning}");
            }
        }

        Ok(config)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogStyle {
    /// Colorized text, used as the default with TTY output
    Color,
    /// Standard text, used as the default with non-TTY output
    Text,
    /// JSON objects
    Json,
}

impl Default for LogStyle {
    fn default() -> Self {
        if std::io::stdout().is_terminal() {
            LogStyle::Color
        } else {
            LogStyle::Text
        }
    }
}

impl AsRef<str> for LogStyle {
    fn as_ref(&self) -> &str {
        match self {
            LogStyle::Color => "color",
            LogStyle::Text => "text",
            LogStyle::Json => "json",
        }
    }
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    /// Disable logging
    Off,
    /// Only log errors
    Error,
    /// Log errors, and warnings. Rate limit rejections are logged as warnings.
    Warn,
    /// Log errors, warnings, and info messages
    #[default]
    Info,
    /// Log errors, warnings, info, and debug messages
    Debug,
    /// Log errors, warnings, info, debug, and trace messages
    Trace,
}

impl LogLevel {
    pub fn env_filter(self) -> EnvFilter {
        let filter_str = match self {
            LogLevel::Off => Cow::Borrowed("off"),
            // Dependencies stay at 'warn', workspace crates follow the selected level.
            level => Cow::Owned(format!(
                "warn,turnstile={level},server={level},rate_limit={level},config={level}"
            )),
        };

        EnvFilter::from_str(&filter_str).expect("These all are valid env filters.")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
