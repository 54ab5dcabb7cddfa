// Process-wide file logger. One log file per day under logs/, each line
// tagged with a scope (a conversation/session id, or "system" for
// process-level events). Minimum level comes from LOG_LEVEL.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> LogLevel {
        match value.to_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

struct LogSink {
    day: String, // YYYYMMDD of the open file
    file: File,
}

pub struct Logger {
    log_dir: PathBuf,
    min_level: LogLevel,
    sink: Mutex<Option<LogSink>>,
}

impl Logger {
    pub fn new() -> Self {
        let min_level = std::env::var("LOG_LEVEL")
            .map(|v| LogLevel::parse(&v))
            .unwrap_or(LogLevel::Info);
        Logger {
            log_dir: PathBuf::from("logs"),
            min_level,
            sink: Mutex::new(None),
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    pub fn log(&self, scope: &str, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }

        let now = chrono::Local::now();
        let line = format!(
            "[{}] [{}] [{}] {}\n",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            level.as_str(),
            scope,
            message
        );

        // Errors also go to stderr so they are visible without tailing
        if level == LogLevel::Error {
            eprintln!("{}", line.trim_end());
        }

        let day = now.format("%Y%m%d").to_string();
        let mut sink = self.sink.lock().unwrap();

        // Roll over to a fresh file when the day changes
        let needs_open = match sink.as_ref() {
            Some(open) => open.day != day,
            None => true,
        };
        if needs_open {
            match self.open_for_day(&day) {
                Ok(file) => {
                    *sink = Some(LogSink {
                        day: day.clone(),
                        file,
                    });
                }
                Err(e) => {
                    // Can't use the logger for its own failure
                    eprintln!("LOGGER ERROR: failed to open log file: {}", e);
                    return;
                }
            }
        }

        if let Some(open) = sink.as_mut() {
            let _ = open.file.write_all(line.as_bytes());
            let _ = open.file.flush();
        }
    }

    fn open_for_day(&self, day: &str) -> std::io::Result<File> {
        std::fs::create_dir_all(&self.log_dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_dir.join(format!("codeatlas_{}.log", day)))
    }

    pub fn debug(&self, scope: &str, message: &str) {
        self.log(scope, LogLevel::Debug, message);
    }

    pub fn info(&self, scope: &str, message: &str) {
        self.log(scope, LogLevel::Info, message);
    }

    pub fn warn(&self, scope: &str, message: &str) {
        self.log(scope, LogLevel::Warn, message);
    }

    pub fn error(&self, scope: &str, message: &str) {
        self.log(scope, LogLevel::Error, message);
    }
}

// Global logger instance
lazy_static::lazy_static! {
    pub static ref LOGGER: Logger = Logger::new();
}

// Scoped macros - take a conversation/session id as first parameter
#[macro_export]
macro_rules! log_debug {
    ($scope:expr, $($arg:tt)*) => {
        $crate::web::logger::LOGGER.debug($scope, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($scope:expr, $($arg:tt)*) => {
        $crate::web::logger::LOGGER.info($scope, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($scope:expr, $($arg:tt)*) => {
        $crate::web::logger::LOGGER.warn($scope, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_error {
    ($scope:expr, $($arg:tt)*) => {
        $crate::web::logger::LOGGER.error($scope, &format!($($arg)*));
    };
}

// Process-level macros (events without a session scope)
#[macro_export]
macro_rules! sys_debug {
    ($($arg:tt)*) => {
        $crate::web::logger::LOGGER.debug("system", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! sys_info {
    ($($arg:tt)*) => {
        $crate::web::logger::LOGGER.info("system", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! sys_warn {
    ($($arg:tt)*) => {
        $crate::web::logger::LOGGER.warn("system", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! sys_error {
    ($($arg:tt)*) => {
        $crate::web::logger::LOGGER.error("system", &format!($($arg)*));
    };
}
