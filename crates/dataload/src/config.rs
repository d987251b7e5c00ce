//! Pipeline configuration, read from a TOML file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use dataload_protocol::defaults::{
    DEFAULT_ADMIN_SCHEMA, DEFAULT_CHUNK_BUDGET_BYTES, DEFAULT_CHUNK_THRESHOLD_BYTES,
    DEFAULT_DELIMITERS, DEFAULT_INSERT_BATCH_ROWS,
};
use dataload_protocol::naming::{safe_identifier, target_table_name};
use dataload_protocol::TableRef;
use dataload_source::{decode_delimiter, SchemaHint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wait::WaitPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main configuration for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// DuckDB file, or `:memory:`
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Watched root: `<root>/<schema>/<table>/drop`
    pub root: PathBuf,

    /// Namespace of the load profile and error log tables
    #[serde(default = "default_admin_schema")]
    pub admin_schema: String,

    /// Candidate delimiters in sniffing order. `%09` style entries are decoded.
    #[serde(default = "default_delimiters")]
    pub delimiters: Vec<String>,

    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    /// Catalog and archive poll interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on every poll before it fails with a wait timeout
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// How long a DDL serializer blocks on an empty queue
    #[serde(default = "default_ddl_idle")]
    pub ddl_idle_ms: u64,

    #[serde(default = "default_insert_batch_rows")]
    pub insert_batch_rows: usize,

    /// Files modified more recently than this are still being written
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_bytes: u64,

    #[serde(default = "default_chunk_budget")]
    pub chunk_budget_bytes: u64,

    #[serde(default = "default_chunk_writers")]
    pub chunk_writers: usize,

    #[serde(default = "default_chunk_queue_depth")]
    pub chunk_queue_depth: usize,

    #[serde(default)]
    pub notify: NotifyConfig,

    /// Fixed column layouts keyed by `schema.table`
    #[serde(default)]
    pub tables: BTreeMap<String, TableLayout>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub recipient: Option<String>,

    /// JSON-lines outbox; notifications are only logged without one
    #[serde(default)]
    pub outbox: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    pub columns: Vec<String>,
    #[serde(default = "default_layout_delimiter")]
    pub delimiter: String,
}

fn default_database_path() -> PathBuf {
    dataload_logging::dataload_home().join("dataload.duckdb")
}

fn default_admin_schema() -> String {
    DEFAULT_ADMIN_SCHEMA.to_string()
}

fn default_delimiters() -> Vec<String> {
    DEFAULT_DELIMITERS.iter().map(|d| d.to_string()).collect()
}

fn default_discovery_interval() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_max_wait() -> u64 {
    600
}

fn default_ddl_idle() -> u64 {
    10_000
}

fn default_insert_batch_rows() -> usize {
    DEFAULT_INSERT_BATCH_ROWS
}

fn default_settle() -> u64 {
    2
}

fn default_chunk_threshold() -> u64 {
    DEFAULT_CHUNK_THRESHOLD_BYTES
}

fn default_chunk_budget() -> u64 {
    DEFAULT_CHUNK_BUDGET_BYTES
}

fn default_chunk_writers() -> usize {
    2
}

fn default_chunk_queue_depth() -> usize {
    4
}

fn default_layout_delimiter() -> String {
    ",".to_string()
}

impl PipelineConfig {
    /// Defaults for everything except the watched root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            database_path: default_database_path(),
            root: root.into(),
            admin_schema: default_admin_schema(),
            delimiters: default_delimiters(),
            discovery_interval_secs: default_discovery_interval(),
            poll_interval_ms: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            ddl_idle_ms: default_ddl_idle(),
            insert_batch_rows: default_insert_batch_rows(),
            settle_secs: default_settle(),
            chunk_threshold_bytes: default_chunk_threshold(),
            chunk_budget_bytes: default_chunk_budget(),
            chunk_writers: default_chunk_writers(),
            chunk_queue_depth: default_chunk_queue_depth(),
            notify: NotifyConfig::default(),
            tables: BTreeMap::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("root must be set".to_string()));
        }
        if self.chunk_budget_bytes == 0 {
            return Err(ConfigError::Invalid(
                "chunk_budget_bytes must be positive".to_string(),
            ));
        }
        if self.chunk_budget_bytes >= self.chunk_threshold_bytes {
            return Err(ConfigError::Invalid(format!(
                "chunk_budget_bytes ({}) must be below chunk_threshold_bytes ({})",
                self.chunk_budget_bytes, self.chunk_threshold_bytes
            )));
        }
        if self.insert_batch_rows == 0 {
            return Err(ConfigError::Invalid(
                "insert_batch_rows must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        self.delimiter_bytes()?;
        self.schema_hints()?;
        Ok(())
    }

    /// The candidate delimiter set as bytes, in configured order.
    pub fn delimiter_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        self.delimiters
            .iter()
            .map(|d| {
                decode_delimiter(d)
                    .ok_or_else(|| ConfigError::Invalid(format!("unsupported delimiter {d:?}")))
            })
            .collect()
    }

    /// Fixed layouts keyed by normalized table identity.
    pub fn schema_hints(&self) -> Result<HashMap<TableRef, SchemaHint>, ConfigError> {
        let mut hints = HashMap::new();
        for (key, layout) in &self.tables {
            let (schema, table) = key.split_once('.').ok_or_else(|| {
                ConfigError::Invalid(format!("table layout key {key:?} is not schema.table"))
            })?;
            if layout.columns.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "table layout {key:?} has no columns"
                )));
            }
            let delimiter = decode_delimiter(&layout.delimiter).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "table layout {key:?} has unsupported delimiter {:?}",
                    layout.delimiter
                ))
            })?;
            hints.insert(
                TableRef::new(safe_identifier(schema), target_table_name(table)),
                SchemaHint::new(layout.columns.clone(), delimiter),
            );
        }
        Ok(hints)
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.max_wait_secs),
        )
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn ddl_idle(&self) -> Duration {
        Duration::from_millis(self.ddl_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let config: PipelineConfig = toml::from_str(r#"root = "/data/drop""#).unwrap();
        assert_eq!(config.root, PathBuf::from("/data/drop"));
        assert_eq!(config.admin_schema, "_admin");
        assert_eq!(config.max_wait_secs, 600);
        assert_eq!(config.chunk_budget_bytes, 160_000_000);
        assert_eq!(config.chunk_threshold_bytes, 500 * 1024 * 1024);
        assert_eq!(config.delimiter_bytes().unwrap(), vec![b',', b'\t', b'|', b';']);
        assert!(config.notify.outbox.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn table_layouts_become_hints() {
        let config: PipelineConfig = toml::from_str(
            r#"
            root = "/data"

            [notify]
            recipient = "ops@example.com"

            [tables."Sales.Orders"]
            columns = ["id", "name"]
            delimiter = "%09"
            "#,
        )
        .unwrap();

        let hints = config.schema_hints().unwrap();
        let hint = &hints[&TableRef::new("sales", "orders")];
        assert_eq!(hint.columns, vec!["id", "name"]);
        assert_eq!(hint.delimiter, b'\t');
        assert_eq!(config.notify.recipient.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn budget_must_be_below_threshold() {
        let mut config = PipelineConfig::new("/data");
        config.chunk_budget_bytes = config.chunk_threshold_bytes;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_layout_key_is_rejected() {
        let mut config = PipelineConfig::new("/data");
        config.tables.insert(
            "orders".to_string(),
            TableLayout {
                columns: vec!["a".to_string()],
                delimiter: ",".to_string(),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("dataload.toml");
        std::fs::write(&path, "root = [").unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("dataload.toml"));
    }
}
