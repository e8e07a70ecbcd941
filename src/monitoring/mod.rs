use anyhow::Result;
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tracing setup for the deployer binary
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    pub verbose: bool,
    pub json_logs: bool,
    /// Also write JSON logs to this file
    pub log_file: Option<PathBuf>,
}

impl TracingConfig {
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// Installs the global subscriber. `RUST_LOG` overrides the level.
    ///
    /// Keep the returned guard alive until exit or buffered file logs are lost.
    pub fn init_tracing(&self) -> Result<Option<WorkerGuard>> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.log_level()))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // diagnostics go to stderr, stdout belongs to the console and the report
        let console_layer = if self.json_logs {
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_writer(io::stderr)
                .boxed()
        } else {
            fmt::layer()
                .with_target(false)
                .compact()
                .with_writer(io::stderr)
                .boxed()
        };

        let (file_layer, guard) = match &self.log_file {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                std::fs::create_dir_all(&dir)?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "deployer.log".to_string());

                let appender = tracing_appender::rolling::never(dir, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_switches_to_debug() {
        let config = TracingConfig {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(config.log_level(), "debug");
        assert_eq!(TracingConfig::default().log_level(), "info");
    }
}
