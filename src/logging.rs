//! Tracing subscriber setup.
//!
//! Logs always go to stderr; stdout carries transcripts and worker events.

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// -1 quiet, 0 normal, 1 verbose, 2+ trace
    pub verbosity: i8,
    pub json: bool,
}

impl LogOptions {
    /// Filter used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> &'static str {
        match self.verbosity {
            i8::MIN..=-1 => "warn",
            0 => "info",
            1 => "info,subflow=debug",
            _ => "debug,subflow=trace",
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(options: LogOptions) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));

    let result = if options.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(std::io::stderr().is_terminal())
                    .with_target(options.verbosity > 0),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
