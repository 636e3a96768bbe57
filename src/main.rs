use clap::Parser;
use querygraph::{config, server};

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// QueryGraph - natural-language questions to SQL over a schema graph
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Load configuration from a YAML file instead of flags
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Load configuration from environment variables instead of flags
    #[arg(long, conflicts_with = "config")]
    from_env: bool,

    /// HTTP server host address
    #[arg(long, default_value = "0.0.0.0")]
    http_host: String,

    /// HTTP server port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Seconds allowed for schema resolution in one turn
    #[arg(long, default_value_t = 120)]
    resolve_timeout_secs: u64,

    /// Longest path searched between two matched tables
    #[arg(long, default_value_t = 9)]
    path_max_depth: usize,

    /// Milliseconds allowed for one table pair's path search
    #[arg(long, default_value_t = 50)]
    pair_timeout_ms: u64,

    /// Nearest neighbours returned per hint
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    /// Destructive statements held for confirmation at once
    #[arg(long, default_value_t = 1024)]
    max_pending_confirmations: usize,

    /// OpenAI-compatible API root
    #[arg(long, default_value = "https://api.openai.com/v1")]
    llm_base_url: String,

    #[arg(long, default_value = "gpt-4.1")]
    completion_model: String,

    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Graph to load at startup, as `graph_id=database` or `database` (repeatable)
    #[arg(long = "database")]
    databases: Vec<String>,
}

impl From<Cli> for config::CliConfig {
    fn from(cli: Cli) -> Self {
        config::CliConfig {
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
            databases: cli
                .databases
                .iter()
                .filter_map(|entry| config::DatabaseSpec::parse(entry))
                .collect(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger - defaults to INFO level, can be overridden with RUST_LOG env var
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    log::info!("QueryGraph v{}", env!("CARGO_PKG_VERSION"));

    let config = if let Some(path) = cli.config.as_ref() {
        config::ServerConfig::from_yaml_file(path)
    } else if cli.from_env {
        config::ServerConfig::from_env()
    } else {
        config::ServerConfig::from_cli(cli.into())
    }
    .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    server::run_with_config(config).await;
    Ok(())
}
