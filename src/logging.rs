//! # Structured Logging Module
//!
//! Environment-aware structured logging for long-running sync runs.
//!
//! `SYNC_CORE_LOG_FORMAT=json` switches the console layer to JSON lines,
//! `RUST_LOG` overrides the environment-derived level.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format of the console layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let format = get_log_format();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = match format {
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
        };

        // A host may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            format = ?format,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Current environment from environment variables
fn get_environment() -> String {
    std::env::var("SYNC_CORE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_format() -> LogFormat {
    match std::env::var("SYNC_CORE_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "test" => "debug",
        "development" => "debug",
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for sync run operations
pub fn log_sync_operation(
    operation: &str,
    entity: &str,
    operation_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        entity = %entity,
        operation_id = operation_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔄 SYNC_OPERATION"
    );
}

/// Log structured data for lock operations
pub fn log_lock_operation(operation: &str, entity: &str, holder: Option<&str>, status: &str) {
    tracing::info!(
        operation = %operation,
        entity = %entity,
        holder = holder,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🔒 LOCK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_sync_operation("start", "products", Some("op-1"), "running", None);
        log_lock_operation("acquire", "products", Some("op-1"), "acquired");
    }
}
