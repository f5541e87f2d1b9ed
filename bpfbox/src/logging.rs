// bpfbox/src/logging.rs

use log::{LevelFilter, SetLoggerError};
use std::io::Write;
use std::sync::Once;

/// Initialize the logging system with the specified log level
pub fn init_logging(level: LevelFilter) -> Result<(), SetLoggerError> {
    static INIT: Once = Once::new();
    let mut result = Ok(());

    INIT.call_once(|| {
        result = env_logger::Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] {} - {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.args()
                )
            })
            .try_init();
    });

    result
}

/// Log level for different components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("invalid log level '{}'", other)),
        }
    }
}

/// Process lifecycle messages (fork, exec, exit)
#[macro_export]
macro_rules! lifecycle_log {
    ($level:expr, $($arg:tt)*) => {{
        match $level {
            $crate::logging::LogLevel::Trace => log::trace!("[LIFECYCLE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Debug => log::debug!("[LIFECYCLE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Info => log::info!("[LIFECYCLE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Warn => log::warn!("[LIFECYCLE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Error => log::error!("[LIFECYCLE] {}", format_args!($($arg)*)),
        }
    }};
}

/// Policy decisions. These sit at warn so they survive the default filter.
#[macro_export]
macro_rules! policy_log {
    ($level:expr, $($arg:tt)*) => {{
        match $level {
            $crate::logging::LogLevel::Trace => log::trace!("[POLICY] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Debug => log::debug!("[POLICY] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Info => log::info!("[POLICY] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Warn => log::warn!("[POLICY] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Error => log::error!("[POLICY] {}", format_args!($($arg)*)),
        }
    }};
}

#[macro_export]
macro_rules! enforce_log {
    ($level:expr, $($arg:tt)*) => {{
        match $level {
            $crate::logging::LogLevel::Trace => log::trace!("[ENFORCE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Debug => log::debug!("[ENFORCE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Info => log::info!("[ENFORCE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Warn => log::warn!("[ENFORCE] {}", format_args!($($arg)*)),
            $crate::logging::LogLevel::Error => log::error!("[ENFORCE] {}", format_args!($($arg)*)),
        }
    }};
}
