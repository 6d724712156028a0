//! Tracing Subscriber Initialization
//!
//! Structured logs go to stderr so `lastinfo-get` can print the payload alone
//! on stdout. The filter comes from `RUST_LOG`; the output format from
//! `LASTINFO_LOG_FORMAT`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::DEFAULT_LOG_FILTER;
use crate::error::{ServiceError, ServiceResult};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Some(Self::Plain),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the start-up log line
    pub service_name: String,
    /// Output format (`LASTINFO_LOG_FORMAT`: plain or json)
    pub format: LogFormat,
}

impl TelemetryConfig {
    pub fn for_service(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            format: std::env::var("LASTINFO_LOG_FORMAT")
                .ok()
                .and_then(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// Must be called once at start-up, before any log line is emitted.
pub fn init_tracing(config: &TelemetryConfig) -> ServiceResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| ServiceError::Telemetry(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Plain));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_telemetry_config_from_env() {
        {
            let _guard = EnvVarGuard::set("LASTINFO_LOG_FORMAT", Some("json"));
            let config = TelemetryConfig::for_service("lastinfo-worker");
            assert_eq!(config.format, LogFormat::Json);
            assert_eq!(config.service_name, "lastinfo-worker");
        }
        {
            let _guard = EnvVarGuard::set("LASTINFO_LOG_FORMAT", None);
            assert_eq!(
                TelemetryConfig::for_service("lastinfo-get").format,
                LogFormat::Plain
            );
        }
    }
}
