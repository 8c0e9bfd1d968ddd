//! Tracing subscriber setup.
//!
//! Every crate logs through `tracing` macros with structured fields
//! (`room_id`, `plugin`). This module installs the subscriber that renders
//! them, driven by [`LoggingConfig`] or assembled by hand:
//!
//! ```rust,ignore
//! use livehub_runtime::logging::{LoggingBuilder, SpanEvents};
//!
//! LoggingBuilder::new()
//!     .directive("livehub_runtime::session=trace")
//!     .span_events(SpanEvents::LIFECYCLE)
//!     .init();
//! ```
//!
//! `RUST_LOG`, when set, replaces the configured base level. Installing a
//! subscriber twice is not an error: the second attempt is ignored.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogLevel, LogOutput, LoggingConfig, SpanEventConfig};

/// Which span lifecycle events the fmt layer reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    /// No span events.
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// Creation and close only; shows how long a session or hook span lived.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    /// Every span event.
    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

/// Installs a subscriber built from `config`.
///
/// Returns false if a global subscriber was already installed.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    LoggingBuilder::from_config(config).try_init().is_ok()
}

/// Builder for the global tracing subscriber.
#[derive(Debug, Default)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    with_line_number: bool,
    file_path: Option<PathBuf>,
}

impl LoggingBuilder {
    /// Creates a builder: compact format to stdout, targets shown, level info.
    pub fn new() -> Self {
        Self {
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            with_target: true,
            ..Default::default()
        }
    }

    /// Creates a builder from a [`LoggingConfig`].
    ///
    /// An unparseable level falls back to info; `validate_config` rejects
    /// such configs before they get here.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new();

        builder.level = Some(
            LogLevel::parse(&config.level)
                .unwrap_or(LogLevel::Info)
                .to_tracing_level(),
        );
        builder.format = config.format;
        builder.output = config.output;
        builder.span_events = SpanEvents::from(&config.span_events);
        builder.with_thread_ids = config.thread_ids;
        builder.with_file = config.file_location;
        builder.with_line_number = config.file_location;
        builder.file_path.clone_from(&config.file_path);

        for (target, level) in &config.filters {
            builder.directives.push(format!("{target}={level}"));
        }

        builder
    }

    /// Sets the base level.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Adds a filter directive such as `livehub_plugin=debug`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    pub fn with_line_number(mut self, enabled: bool) -> Self {
        self.with_line_number = enabled;
        self
    }

    /// Log file used with [`LogOutput::File`].
    pub fn file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// `RUST_LOG` if set, else the base level; directives layer on top.
    /// Directives that fail to parse are skipped.
    fn build_filter(&self) -> EnvFilter {
        let base = self.level.unwrap_or(tracing::Level::INFO);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(base.as_str().to_ascii_lowercase()));
        self.directives
            .iter()
            .filter_map(|d| d.parse().ok())
            .fold(filter, EnvFilter::add_directive)
    }

    fn make_writer(&self) -> BoxMakeWriter {
        match (self.output, &self.file_path) {
            (LogOutput::Stdout, _) => BoxMakeWriter::new(std::io::stdout),
            (LogOutput::Stderr, _) => BoxMakeWriter::new(std::io::stderr),
            (LogOutput::File, Some(path)) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path.file_name().unwrap_or_else(|| OsStr::new("livehub.log"));
                BoxMakeWriter::new(tracing_appender::rolling::never(dir, name))
            }
            (LogOutput::File, None) => {
                warn!("File output requested without a file path, logging to stdout");
                BoxMakeWriter::new(std::io::stdout)
            }
        }
    }

    /// Installs the subscriber, ignoring an already-installed one.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let base = fmt::layer()
            .with_writer(self.make_writer())
            .with_span_events(self.span_events.to_fmt_span())
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "json-log")]
            LogFormat::Json => base.json().boxed(),
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Full => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(self.build_filter())
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_span_event_presets() {
        assert_eq!(SpanEvents::default(), SpanEvents::NONE);
        let cfg = SpanEventConfig {
            new: true,
            close: true,
            ..Default::default()
        };
        assert_eq!(SpanEvents::from(&cfg), SpanEvents::LIFECYCLE);
    }

    #[test]
    fn test_from_config_collects_filters() {
        let config = LoggingConfig {
            level: "debug".into(),
            filters: BTreeMap::from([("livehub_plugin".to_string(), "trace".to_string())]),
            file_location: true,
            ..Default::default()
        };
        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Some(tracing::Level::DEBUG));
        assert_eq!(builder.directives, ["livehub_plugin=trace"]);
        assert!(builder.with_file && builder.with_line_number);
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_from_config(&config);
        assert!(!init_from_config(&config));
    }
}
