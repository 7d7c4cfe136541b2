//! Logging setup and configuration

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Everything needed to build the global subscriber
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    /// Level applied to every target without a more specific directive
    pub default_level: String,
    /// Per-target level overrides as `(target, level)` pairs
    pub targets: Vec<(String, String)>,
    /// Append log output to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Render the settings as an `EnvFilter` directive string
    ///
    /// The default level comes first so later target directives refine it.
    pub fn directives(&self) -> String {
        let mut directives = vec![self.default_level.clone()];
        for (target, level) in &self.targets {
            directives.push(format!("{}={}", target, level));
        }
        directives.join(",")
    }

    /// Build the filter, letting `RUST_LOG` take precedence
    pub fn filter(&self) -> crate::Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directives()))
            .map_err(|e| crate::Error::Logging(format!("Invalid log filter: {}", e)))
    }
}

/// Setup tracing subscriber with per-target levels and an optional log file
///
/// If the log file cannot be opened, output falls back to stderr and a
/// warning is emitted once the subscriber is live.
pub fn setup_logging(settings: &LogSettings) -> crate::Result<()> {
    let filter = settings.filter()?;

    let mut open_failure = None;
    let file = match &settings.file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                open_failure = Some(format!("Could not open log file '{}': {}", path.display(), e));
                None
            }
        },
        None => None,
    };

    let (file_layer, stderr_layer) = match file {
        Some(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        None => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| crate::Error::Logging(e.to_string()))?;

    if let Some(message) = open_failure {
        tracing::warn!("{}", message);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_default_only() {
        let settings = LogSettings {
            default_level: "info".to_string(),
            ..LogSettings::default()
        };
        assert_eq!(settings.directives(), "info");
    }

    #[test]
    fn test_directives_with_targets() {
        let settings = LogSettings {
            default_level: "warn".to_string(),
            targets: vec![
                ("usb_bridged::usb".to_string(), "debug".to_string()),
                ("usb_bridged::network".to_string(), "error".to_string()),
            ],
            file: None,
        };
        assert_eq!(
            settings.directives(),
            "warn,usb_bridged::usb=debug,usb_bridged::network=error"
        );
    }
}
