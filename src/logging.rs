//! Structured logging for actionkey
//!
//! All events carry structured fields so a run can be reconstructed from the
//! log alone.
//!
//! # Field conventions
//!
//! - `operation`: what is being done ("key", "check", "record", "write", "run")
//! - `status`: outcome ("success", "hit", "miss", "uncacheable", "error")
//! - `mnemonic`: kind of action
//! - `output`: exec path of the primary output
//! - `key`: action cache key (hex)
//!
//! Operation and status values come from [`operations`] and [`status`].
//!
//! ```rust
//! use tracing::info;
//!
//! # let key = "3f1c";
//! info!(
//!     operation = "record",
//!     status = "success",
//!     output = "bazel-out/testlogs/app/lib/baseline_coverage.dat",
//!     key,
//!     "cache entry stored"
//! );
//! ```

use std::io::{self, IsTerminal};
use std::fmt as std_fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that shows "actionkey" instead of the full module path
struct ActionKeyFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ActionKeyFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();
        write!(writer, "{} ", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        if self.with_ansi {
            write!(
                writer,
                "{}{:5}(actionkey)\x1b[0m: ",
                level_color(meta.level()),
                meta.level()
            )?;
        } else {
            write!(writer, "{:5}(actionkey): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn level_color(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::ERROR => "\x1b[31m",
        tracing::Level::WARN => "\x1b[33m",
        tracing::Level::INFO => "\x1b[32m",
        tracing::Level::DEBUG => "\x1b[34m",
        tracing::Level::TRACE => "\x1b[35m",
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (ACTIONKEY_LOG_FORMAT)
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("ACTIONKEY_LOG_FORMAT").unwrap_or_default())
    }

    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                // Default: pretty for dev, compact for production/CI
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn")
/// - `ACTIONKEY_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// `verbose` raises the default level to debug when `RUST_LOG` is unset.
/// Calling this twice is harmless; the second subscriber is ignored.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let format = LogFormat::from_env();

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(ActionKeyFormatter {
                            with_ansi: io::stderr().is_terminal(),
                        })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(ActionKeyFormatter { with_ansi: false })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .try_init()
                .ok();
        }
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const KEY: &str = "key";
    pub const CHECK: &str = "check";
    pub const RECORD: &str = "record";
    pub const WRITE: &str = "write";
    pub const RUN: &str = "run";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const UNCACHEABLE: &str = "uncacheable";
    pub const ERROR: &str = "error";
}
