use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for the logging system
///
/// Logs never go to stdout: stdout carries the protocol stream.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create LogConfig from environment variables
    ///
    /// - `RUST_LOG`: level filter
    /// - `LSP_LOG_FILE`: log file path
    /// - `LSP_LOG_UNIQUE=true`: add the process id to the log file name
    /// - `LSP_LOG_JSON=true`: JSON formatted lines
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_path = env::var("LSP_LOG_FILE").ok().map(|path| {
            let path_buf = PathBuf::from(path);
            if env::var("LSP_LOG_UNIQUE").unwrap_or_default() == "true" {
                unique_log_path(path_buf, std::process::id())
            } else {
                path_buf
            }
        });

        let json_format = env::var("LSP_LOG_JSON").unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Override values from CLI arguments
    pub fn with_overrides(
        mut self,
        level: Option<String>,
        file_path: Option<PathBuf>,
        json_format: bool,
    ) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self.json_format |= json_format;
        self
    }
}

/// Insert a process id before the extension: `server.log` -> `server.<pid>.log`
fn unique_log_path(mut path: PathBuf, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return path;
    };

    let unique_filename = match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) if !extension.is_empty() => format!("{stem}.{pid}.{extension}"),
        _ => format!("{stem}.{pid}"),
    };

    path.set_file_name(unique_filename);
    path
}

/// Open a log file for appending, creating missing parent directories
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialize the logging system based on configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        (Some(file_path), true) => {
            let file = open_log_file(file_path)?;
            let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);

            subscriber.with(file_layer).try_init()?;
        }
        (Some(file_path), false) => {
            let file = open_log_file(file_path)?;
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);

            subscriber.with(file_layer).try_init()?;
        }
        (None, true) => {
            let stderr_layer = fmt::layer().json().with_writer(io::stderr).with_ansi(false);

            subscriber.with(stderr_layer).try_init()?;
        }
        (None, false) => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);

            subscriber.with(stderr_layer).try_init()?;
        }
    }

    Ok(())
}

/// Log one protocol frame body as a single structured event
///
/// `direction` is "editor" for inbound frames and "server" for outbound ones.
#[macro_export]
macro_rules! log_lsp_message {
    ($level:expr, $direction:expr, $body:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            bytes = $body.len(),
            body = %$body,
            pid = std::process::id(),
            "LSP message"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_log_path_with_extension() {
        let path = unique_log_path(PathBuf::from("/tmp/logs/server.log"), 42);
        assert_eq!(path, PathBuf::from("/tmp/logs/server.42.log"));
    }

    #[test]
    fn test_unique_log_path_without_extension() {
        let path = unique_log_path(PathBuf::from("server"), 7);
        assert_eq!(path, PathBuf::from("server.7"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = LogConfig::default().with_overrides(
            Some("debug".to_string()),
            Some(PathBuf::from("out.log")),
            true,
        );
        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("out.log")));
        assert!(config.json_format);

        let untouched = LogConfig::default().with_overrides(None, None, false);
        assert_eq!(untouched.level, "info");
        assert!(untouched.file_path.is_none());
        assert!(!untouched.json_format);
    }

    #[test]
    fn test_open_log_file_creates_directories_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("server.log");

        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "first").unwrap();
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "second").unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
