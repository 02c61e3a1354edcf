use serde::{Deserialize, Serialize};

/// `[observability]`: how the process logs and whether it exports metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// `[observability.logging]`. `RUST_LOG` still wins over `level` and `filter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    /// Prefix each line with a timestamp.
    #[serde(default = "enabled_by_default")]
    pub timestamps: bool,

    /// Show the source file and line of each event.
    #[serde(default)]
    pub file_line: bool,

    /// JSON only: attach the current span and its parents to each event.
    #[serde(default = "enabled_by_default")]
    pub include_spans: bool,

    /// Extra `EnvFilter` directives, e.g. `"sqlx=info,timetable_reconciler::jobs=debug"`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            timestamps: true,
            file_line: false,
            include_spans: true,
            filter: None,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive form accepted by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, for a terminal.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event, for log shippers.
    Json,
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// `[observability.metrics]`. Only takes effect with the `prometheus` feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Bucket bounds for `reconciliation_run_duration_seconds`, in milliseconds.
    #[serde(default = "default_run_duration_buckets")]
    pub duration_buckets_ms: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_buckets_ms: default_run_duration_buckets(),
        }
    }
}

/// A pass is a couple of queries, but a large table can push it toward the
/// timeout, so the buckets run out to five minutes.
fn default_run_duration_buckets() -> Vec<f64> {
    vec![
        10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 5_000.0, 15_000.0, 60_000.0, 120_000.0,
        300_000.0,
    ]
}
