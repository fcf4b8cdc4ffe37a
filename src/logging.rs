//! Logging conventions.
//!
//! The toolkit consumes the `log` facade as an opaque sink; the embedding
//! application chooses sinks and formatters. Four severities are used:
//!
//! - `log::debug!` — chatty lifecycle tracing,
//! - `log::warn!`  — recoverable oddities (overflow, discarded requests),
//! - `log::error!` — failures that abort an operation,
//! - access        — connection/request accounting, emitted through
//!   [`access!`] at info level under the `servkit::access` target so sinks
//!   can route it separately.
//!
//! Messages carry a bracketed component tag, e.g. `"[Broker] connected"`.

/// Target under which access records are emitted.
pub const ACCESS_TARGET: &str = "servkit::access";

#[doc(hidden)]
pub use log;

/// Emit an access-log record.
///
/// ```
/// use servkit::access;
/// access!("connection from {}", "127.0.0.1:9000");
/// ```
#[macro_export]
macro_rules! access {
    ($($arg:tt)+) => {
        $crate::logging::log::info!(target: $crate::logging::ACCESS_TARGET, $($arg)+)
    };
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #[test]
    fn test_access_macro_expands() {
        // Compile-and-run check; the record goes to whatever sink is active.
        access!("test access record {}", 42);
    }
}
