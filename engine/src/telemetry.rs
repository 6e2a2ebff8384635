//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for the `lorekeeper` binary. Logs always go to
//! stderr so `--json` command output on stdout stays machine-readable.
//!
//! Guest log lines carry a `plugin` field and a `guest_message`, so
//! `RUST_LOG=lorekeeper_engine::capability=debug` isolates plugin chatter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Shape of emitted log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One JSON object per line with span context
    Json,
}

impl LogFormat {
    /// Pretty in debug builds, JSON in release builds
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Filter used when `RUST_LOG` is not set
fn default_directives(log_level: &str) -> String {
    format!("warn,lorekeeper_engine={level},lorekeeper={level}", level = log_level)
}

/// Install the global subscriber
///
/// Priority: `RUST_LOG` env var > `log_level` > "info". Calling it again is a
/// no-op.
pub fn init_telemetry(log_level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Telemetry already initialized");
    }
}
