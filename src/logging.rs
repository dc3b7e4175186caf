//! Logging and tracing initialization for nrped.
//!
//! Structured logging through the `tracing` ecosystem, either as compact
//! console output or as JSON for log aggregation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// Call once at startup, before the configuration is loaded. The log level can be overridden at runtime via the
/// `RUST_LOG` environment variable.
///
/// # Examples
///
/// ```ignore
/// nrped::logging::init(LogConfig::default());
///
/// // Debug output, including per-connection events
/// nrped::logging::init(LogConfig { verbose: true, ..Default::default() });
///
/// // JSON output for log aggregation
/// nrped::logging::init(LogConfig { json: true, ..Default::default() });
/// ```
pub fn init(config: LogConfig) {
    // RUST_LOG wins over the verbose flag
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("nrped={}", default_level.as_str().to_lowercase()))
    });

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

/// A rate limiter for log messages that could otherwise flood the output.
///
/// The listener uses it for accept failures: when the process runs out of file
/// descriptors every `accept()` fails immediately, and reporting each one would
/// drown the log.
///
/// # Example
///
/// ```ignore
/// let throttle = LogThrottle::new(Duration::from_secs(5));
///
/// loop {
///     match socket.accept().await {
///         Ok((stream, peer)) => serve(stream, peer),
///         Err(e) if throttle.should_log() => tracing::error!(error = %e, "Failed to accept connection"),
///         Err(_) => {}
///     }
/// }
/// ```
pub struct LogThrottle {
    interval_ms: u64,
    /// Last log time in ms, or `NEVER_LOGGED`
    last_log_ms: AtomicU64,
    start: Instant,
}

/// Sentinel for "never logged"
const NEVER_LOGGED: u64 = u64::MAX;

impl LogThrottle {
    /// Create a throttle that logs at most once per `interval`.
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last log.
    ///
    /// Safe to call from several tasks at once; only one of them wins a slot.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        let should = last == NEVER_LOGGED || now_ms.saturating_sub(last) >= self.interval_ms;

        if should {
            // Losing the race means another thread just logged
            self.last_log_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        } else {
            false
        }
    }
}
