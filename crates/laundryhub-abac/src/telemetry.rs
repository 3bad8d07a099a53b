//! Tracing setup for services embedding the evaluator.
//!
//! Decision records from [`TracingAuditSink`](crate::audit::TracingAuditSink)
//! are emitted on [`AUDIT_TARGET`]. [`init_tracing_with_audit_writer`] sends
//! them to a dedicated writer (an audit log file, for example) and keeps them
//! out of the regular log output.
//!
//! ```ignore
//! let audit_log = std::fs::File::create("abac-audit.log")?;
//! laundryhub_abac::telemetry::init_tracing_with_audit_writer(
//!     "laundryhub_abac=debug",
//!     std::sync::Mutex::new(audit_log),
//! );
//! ```

use std::sync::OnceLock;

use tracing::Subscriber;
use tracing_subscriber::filter::{LevelFilter, ParseError, Targets};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*, reload};

use crate::audit::AUDIT_TARGET;

/// Filter used when neither `RUST_LOG` nor a valid level is given.
pub const DEFAULT_DIRECTIVES: &str = "warn,laundryhub_abac=info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Errors from runtime logging changes.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The directive string could not be parsed.
    #[error("Invalid filter directive: {0}")]
    InvalidDirective(#[from] ParseError),

    /// No subscriber was installed through this module.
    #[error("Tracing has not been initialized")]
    NotInitialized,

    /// The installed filter could not be replaced.
    #[error("Failed to apply filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Install a global subscriber with [`DEFAULT_DIRECTIVES`], or `RUST_LOG`
/// when set.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    init_tracing_with_level(DEFAULT_DIRECTIVES)
}

/// Install a global subscriber writing everything, audit events included,
/// to stdout.
///
/// `RUST_LOG` takes precedence when it is set and valid; an invalid `level`
/// falls back to [`DEFAULT_DIRECTIVES`]. Returns `false` if a global
/// subscriber was already installed.
pub fn init_tracing_with_level(level: &str) -> bool {
    let (filter, handle) = reload::Layer::new(base_filter(level));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    remember(installed, handle)
}

/// Install a global subscriber that writes audit events to `audit_writer`
/// and all other events to stdout.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing_with_audit_writer<W>(level: &str, audit_writer: W) -> bool
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(base_filter(level));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_filter(without_audit()))
        .with(audit_layer(audit_writer))
        .try_init()
        .is_ok();
    remember(installed, handle)
}

/// A layer that formats only decision audit events, without ANSI colors.
///
/// For hosts composing their own subscriber.
pub fn audit_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(audit_only())
}

/// Replace the active filter, e.g. `"laundryhub_abac=debug"`.
///
/// # Errors
///
/// Returns an error if the directive does not parse, if tracing was not
/// initialized through this module, or if the filter could not be swapped.
pub fn apply_logging_level(level: &str) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(level)?;
    let handle = FILTER_HANDLE.get().ok_or(TelemetryError::NotInitialized)?;
    handle.reload(filter)?;
    tracing::info!(filter = level, "Logging filter updated");
    Ok(())
}

fn base_filter(level: &str) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn remember(installed: bool, handle: reload::Handle<EnvFilter, Registry>) -> bool {
    if installed {
        let _ = FILTER_HANDLE.set(handle);
    }
    installed
}

fn audit_only() -> Targets {
    Targets::new().with_target(AUDIT_TARGET, LevelFilter::TRACE)
}

fn without_audit() -> Targets {
    Targets::new()
        .with_default(LevelFilter::TRACE)
        .with_target(AUDIT_TARGET, LevelFilter::OFF)
}
