//! Tracing setup for the `impactrec` binary.
//!
//! Library code only emits events; installing a subscriber is left to the
//! binary and to tests.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the binary logs, from `-q`/`-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Lifecycle, crashes and upload outcomes.
    #[default]
    Normal,
    /// Capture state transitions.
    Verbose,
    /// Every sensor sample and audio chunk.
    Trace,
}

impl Verbosity {
    /// Filter directive used when `RUST_LOG` is unset.
    #[must_use]
    pub fn directive(self) -> &'static str {
        match self {
            Self::Quiet => "impactrecorder=error",
            Self::Normal => "impactrecorder=info",
            Self::Verbose => "impactrecorder=debug",
            Self::Trace => "impactrecorder=trace",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `verbosity`; calls
/// after the first are ignored.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Warnings and errors through the test writer.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_per_verbosity() {
        assert_eq!(Verbosity::Quiet.directive(), "impactrecorder=error");
        assert_eq!(Verbosity::default().directive(), "impactrecorder=info");
        assert_eq!(Verbosity::Trace.directive(), "impactrecorder=trace");
    }

    #[test]
    fn test_directives_parse() {
        for verbosity in [
            Verbosity::Quiet,
            Verbosity::Normal,
            Verbosity::Verbose,
            Verbosity::Trace,
        ] {
            assert!(EnvFilter::try_new(verbosity.directive()).is_ok());
        }
    }
}
