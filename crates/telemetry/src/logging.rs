use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Format, Json, JsonFields},
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Keeps the non-blocking file writer alive for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Noisy dependencies capped at warn unless RUST_LOG says otherwise
const QUIET_TARGETS: &[&str] = &["hyper=warn", "tokio=warn", "reqwest=warn", "ort=warn"];

/// Log output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// Compact text format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl LogFormat {
    /// Parse log format from environment variable
    pub fn from_env() -> Self {
        Self::parse(&env::var("LOG_FORMAT").unwrap_or_default())
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => Self::default(),
        }
    }
}

/// Configuration for structured logging
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log output format (pretty/compact/json)
    pub format: LogFormat,
    /// Service name (e.g., "complaint-service")
    pub service_name: String,
    pub service_version: String,
    /// Kiosk / node identifier
    pub node_id: Option<String>,
    /// Environment (dev/staging/production)
    pub environment: String,
    /// Enable span events (new/close)
    pub enable_span_events: bool,
    /// Log to file in addition to stdout
    pub log_to_file: bool,
    pub log_dir: Option<String>,
}

impl LogConfig {
    /// Create a new log configuration from the environment
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            format: LogFormat::from_env(),
            service_name: service_name.into(),
            service_version: env::var("SERVICE_VERSION").unwrap_or_else(|_| "0.1.0".to_string()),
            node_id: env::var("NODE_ID").ok(),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            enable_span_events: env::var("LOG_SPAN_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_to_file: env::var("LOG_TO_FILE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: env::var("LOG_DIR").ok(),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.enable_span_events = enable;
        self
    }

    /// Enable logging to a daily-rolled JSON file in `log_dir`
    pub fn with_file_logging(mut self, log_dir: impl Into<String>) -> Self {
        self.log_to_file = true;
        self.log_dir = Some(log_dir.into());
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.enable_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

fn env_filter() -> EnvFilter {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for target in QUIET_TARGETS {
        if let Ok(directive) = target.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

type FileLayer<S> = fmt::Layer<S, JsonFields, Format<Json>, NonBlocking>;

fn file_layer<S>(config: &LogConfig) -> Option<FileLayer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if !config.log_to_file {
        return None;
    }
    let log_dir = config.log_dir.as_deref()?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "complaints.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if FILE_GUARD.set(guard).is_err() {
        // logging was already initialised once; keep the first writer
        return None;
    }
    Some(
        fmt::layer()
            .json()
            .with_span_events(config.span_events())
            .with_writer(non_blocking),
    )
}

/// Initialize structured logging with the given configuration
pub fn init_structured_logging(config: LogConfig) {
    let registry = tracing_subscriber::registry().with(env_filter());

    let installed = match config.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(config.span_events())
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(io::stdout);
            let file = file_layer(&config);
            registry.with(json_layer).with(file).try_init()
        }
        LogFormat::Compact => {
            let compact_layer = fmt::layer()
                .compact()
                .with_span_events(config.span_events())
                .with_target(true)
                .with_thread_ids(false);
            let file = file_layer(&config);
            registry.with(compact_layer).with(file).try_init()
        }
        LogFormat::Pretty => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(config.span_events())
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true);
            let file = file_layer(&config);
            registry.with(pretty_layer).with(file).try_init()
        }
    };

    if installed.is_err() {
        return;
    }

    tracing::info!(
        service.name = %config.service_name,
        service.version = %config.service_version,
        node.id = config.node_id.as_deref().unwrap_or("-"),
        environment = %config.environment,
        format = ?config.format,
        file_logging = config.log_to_file,
        "structured logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Pretty);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("complaint-service")
            .with_version("1.0.0")
            .with_environment("production")
            .with_node_id("kiosk-7")
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_file_logging("/var/log/complaints");

        assert_eq!(config.service_name, "complaint-service");
        assert_eq!(config.service_version, "1.0.0");
        assert_eq!(config.environment, "production");
        assert_eq!(config.node_id, Some("kiosk-7".to_string()));
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.enable_span_events);
        assert!(config.log_to_file);
        assert_eq!(config.log_dir.as_deref(), Some("/var/log/complaints"));
        assert_eq!(config.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
    }
}
