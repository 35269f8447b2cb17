use crate::config::LoggingConfig;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "nginx-certbot.log";

fn default_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer and must be kept alive for
/// the lifetime of the process when logging to a file.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level(&config.level).into())
        .from_env_lossy();

    let file_dir = match (config.output.as_str(), config.file_path.as_deref()) {
        ("file", Some(dir)) => Some(dir),
        _ => None,
    };

    match (file_dir, config.format.as_str()) {
        (None, "json") => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stdout))
                .init();
            None
        }
        (None, _) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stdout))
                .init();
            None
        }
        (Some(dir), format) => {
            let file_appender = tracing_appender::rolling::daily(Path::new(dir), LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            if format == "json" {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(non_blocking))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                    .init();
            }
            Some(guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level("debug"), Level::DEBUG);
        assert_eq!(default_level("error"), Level::ERROR);
        assert_eq!(default_level("verbose"), Level::INFO);
    }
}
