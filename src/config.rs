use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

use crate::resolver::ResolverSettings;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// A database whose schema graph is loaded at startup
#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
pub struct DatabaseSpec {
    /// Id the graph is served under (`/graphs/{graph_id}`)
    #[validate(length(min = 1, max = 100, message = "Graph id must be 1-100 characters"))]
    pub graph_id: String,

    /// ClickHouse database name
    #[validate(length(min = 1, message = "Database name cannot be empty"))]
    pub database: String,

    /// Domain description shown to the language model; generated from the tables when empty
    #[serde(default)]
    pub description: String,

    /// ClickHouse URL when it differs from `CLICKHOUSE_URL`
    #[serde(default)]
    pub url: Option<String>,
}

impl DatabaseSpec {
    /// Parse `graph_id=database` or a bare `database` (served under its own name)
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        let (graph_id, database) = match entry.split_once('=') {
            Some((graph_id, database)) => (graph_id.trim(), database.trim()),
            None => (entry, entry),
        };
        Some(Self {
            graph_id: graph_id.to_string(),
            database: database.to_string(),
            description: String::new(),
            url: None,
        })
    }
}

/// Server configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server host address
    #[validate(length(min = 1, message = "HTTP host cannot be empty"))]
    pub http_host: String,

    /// HTTP server port (1-65535)
    #[validate(range(
        min = 1,
        max = 65535,
        message = "HTTP port must be between 1 and 65535"
    ))]
    pub http_port: u16,

    /// Wall-clock budget for schema resolution in one turn
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Resolve timeout must be between 1 and 3600 seconds"
    ))]
    pub resolve_timeout_secs: u64,

    /// Longest path (in edges) searched between two matched tables
    #[validate(range(min = 1, max = 32, message = "Path depth must be between 1 and 32"))]
    pub path_max_depth: usize,

    /// Budget for one table pair's shortest-path search
    #[validate(range(
        min = 1,
        max = 60000,
        message = "Pair timeout must be between 1 and 60000 ms"
    ))]
    pub pair_timeout_ms: u64,

    /// Nearest neighbours returned per hint
    #[validate(range(min = 1, max = 50, message = "top_k must be between 1 and 50"))]
    pub top_k: usize,

    /// Destructive statements held for confirmation at once
    #[validate(range(min = 1, message = "At least one pending confirmation must be allowed"))]
    pub max_pending_confirmations: usize,

    /// OpenAI-compatible API root
    #[validate(url(message = "LLM base URL must be a valid URL"))]
    pub llm_base_url: String,

    #[validate(length(min = 1, message = "Completion model cannot be empty"))]
    pub completion_model: String,

    #[validate(length(min = 1, message = "Embedding model cannot be empty"))]
    pub embedding_model: String,

    /// Graphs loaded at startup
    #[validate(nested)]
    pub databases: Vec<DatabaseSpec>,

    /// Maximum accepted request body
    #[validate(range(min = 1024, message = "Body limit must be at least 1024 bytes"))]
    pub request_body_limit_bytes: usize,

    /// Timeout for non-streaming routes
    #[validate(range(min = 1, message = "Request timeout must be at least 1 second"))]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            resolve_timeout_secs: 120,
            path_max_depth: 9,
            pair_timeout_ms: 50,
            top_k: 3,
            max_pending_confirmations: 1024,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            completion_model: "gpt-4.1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            databases: Vec::new(),
            request_body_limit_bytes: 1024 * 1024,
            request_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            http_host: env::var("QUERYGRAPH_HOST").unwrap_or(defaults.http_host),
            http_port: parse_env_var("QUERYGRAPH_PORT", "8080")?,
            resolve_timeout_secs: parse_env_var("QUERYGRAPH_RESOLVE_TIMEOUT_SECS", "120")?,
            path_max_depth: parse_env_var("QUERYGRAPH_PATH_MAX_DEPTH", "9")?,
            pair_timeout_ms: parse_env_var("QUERYGRAPH_PAIR_TIMEOUT_MS", "50")?,
            top_k: parse_env_var("QUERYGRAPH_TOP_K", "3")?,
            max_pending_confirmations: parse_env_var("QUERYGRAPH_MAX_PENDING_CONFIRMATIONS", "1024")?,
            llm_base_url: env::var("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            completion_model: env::var("COMPLETION_MODEL").unwrap_or(defaults.completion_model),
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            databases: env::var("QUERYGRAPH_DATABASES")
                .map(|list| list.split(',').filter_map(DatabaseSpec::parse).collect())
                .unwrap_or_default(),
            request_body_limit_bytes: parse_env_var("QUERYGRAPH_BODY_LIMIT_BYTES", "1048576")?,
            request_timeout_secs: parse_env_var("QUERYGRAPH_REQUEST_TIMEOUT_SECS", "300")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from CLI arguments with validation
    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            http_host: cli.http_host,
            http_port: cli.http_port,
            resolve_timeout_secs: cli.resolve_timeout_secs,
            path_max_depth: cli.path_max_depth,
            pair_timeout_ms: cli.pair_timeout_ms,
            top_k: cli.top_k,
            max_pending_confirmations: cli.max_pending_confirmations,
            llm_base_url: cli.llm_base_url,
            completion_model: cli.completion_model,
            embedding_model: cli.embedding_model,
            databases: cli.databases,
            request_body_limit_bytes: defaults.request_body_limit_bytes,
            request_timeout_secs: defaults.request_timeout_secs,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            top_k: self.top_k,
            path_max_depth: self.path_max_depth,
            pair_timeout: Duration::from_millis(self.pair_timeout_ms),
        }
    }
}

/// CLI configuration (parsed from command line arguments)
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub http_host: String,
    pub http_port: u16,
    pub resolve_timeout_secs: u64,
    pub path_max_depth: usize,
    pub pair_timeout_ms: u64,
    pub top_k: usize,
    pub max_pending_confirmations: usize,
    pub llm_base_url: String,
    pub completion_model: String,
    pub embedding_model: String,
    pub databases: Vec<DatabaseSpec>,
}

/// Secrets never live in [`ServerConfig`]; they are read from the environment on use
pub fn llm_api_key() -> Result<String, ConfigError> {
    Ok(env::var("LLM_API_KEY")?)
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
