//! # Datascope CLI (`dscope`)
//!
//! The `dscope` binary is the primary interface for Datascope. It provides
//! commands for dataset search, observation retrieval, temporal coverage
//! lookup, the bundled indicator catalog, an agent mode, and the MCP server.
//!
//! ## Usage
//!
//! ```bash
//! dscope --config ./config/dscope.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dscope search "<query>"` | Search the catalog for matching datasets |
//! | `dscope retrieve <indicator> <database>` | Fetch and shape observations |
//! | `dscope coverage <indicator> <database>` | Report the covered year range |
//! | `dscope indicators popular` | List the bundled popular indicators |
//! | `dscope indicators search "<query>"` | Search the bundled metadata offline |
//! | `dscope agent "<question>"` | Answer a question via the agent loop |
//! | `dscope serve mcp` | Start the MCP-compatible HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Find population datasets (AI enhancement applies when configured)
//! dscope search "population of Kenya"
//!
//! # Latest population figures, aggregates excluded, compacted
//! dscope retrieve WB_WDI_SP_POP_TOTL WB_WDI --year 2023 --limit 10
//!
//! # Everything the API has, unshaped
//! dscope retrieve WB_WDI_SP_POP_TOTL WB_WDI --include-aggregates --raw --limit 0
//!
//! # Start MCP server for Cursor integration
//! dscope serve mcp --config ./config/dscope.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use datascope::agent::run_agent;
use datascope::catalog::{list_popular_indicators, search_local_indicators, CatalogCache};
use datascope::client::StatApiClient;
use datascope::completion::create_provider;
use datascope::config::load_config;
use datascope::coverage::get_temporal_coverage;
use datascope::models::DataQuery;
use datascope::orchestrate::{orchestrated_search, NullExtractor};
use datascope::retrieve::{retrieve_data, ShapeOptions};
use datascope::server::run_server;

/// Datascope CLI — a search-and-retrieval pipeline for statistical
/// indicator data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dscope.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dscope",
    about = "Datascope — search and retrieval for statistical indicator data",
    version,
    long_about = "Datascope wraps a statistical data API in typed operations: dataset search \
    with optional AI query enhancement and result selection, paginated observation retrieval \
    with aggregate filtering and compaction, temporal coverage lookup, and an MCP-compatible \
    HTTP server for AI tool integration."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/dscope.toml`. A missing file falls back to
    /// built-in defaults pointing at the public API.
    #[arg(long, global = true, default_value = "./config/dscope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Search the catalog for datasets matching a query.
    ///
    /// Runs the full pipeline: AI query enhancement (when configured),
    /// remote search, and AI best-match selection. With AI disabled the
    /// query is sent as-is and the results come back unranked.
    Search {
        /// Free-text query, e.g. "population of Kenya".
        query: String,

        /// Maximum number of results to request.
        #[arg(long)]
        top: Option<i64>,
    },

    /// Fetch observations for an indicator and shape the result.
    ///
    /// Pages through the data endpoint (up to 10,000 records), then
    /// filters aggregates, sorts by value, limits, and compacts
    /// according to the flags and config defaults.
    Retrieve {
        /// Indicator code, e.g. `WB_WDI_SP_POP_TOTL`.
        indicator: String,

        /// Database id, e.g. `WB_WDI`.
        database: String,

        /// Restrict to a single year.
        #[arg(long)]
        year: Option<String>,

        /// Comma-separated country codes, e.g. `KEN,UGA`.
        #[arg(long)]
        countries: Option<String>,

        /// Sex dimension code, e.g. `F`.
        #[arg(long)]
        sex: Option<String>,

        /// Age dimension code, e.g. `Y0T14`.
        #[arg(long)]
        age: Option<String>,

        /// Maximum records to return; 0 means no limit.
        #[arg(long)]
        limit: Option<i64>,

        /// Sort direction for observation values: `desc` or `asc`.
        #[arg(long)]
        sort_order: Option<String>,

        /// Keep regional and income aggregates in the results.
        #[arg(long)]
        include_aggregates: bool,

        /// Return full records instead of country/year/value compaction.
        #[arg(long)]
        raw: bool,
    },

    /// Report the year range an indicator's observations cover.
    Coverage {
        /// Indicator code.
        indicator: String,

        /// Database id.
        database: String,
    },

    /// Query the bundled indicator catalog (no network access).
    Indicators {
        #[command(subcommand)]
        action: IndicatorsAction,
    },

    /// Answer a question through the tool-calling agent loop.
    ///
    /// Requires an AI provider to be configured; the model searches the
    /// catalog iteratively and replies with the best indicator it found.
    Agent {
        /// The question, e.g. "latest GDP figures for East Africa".
        question: String,
    },

    /// Start the MCP-compatible HTTP server.
    ///
    /// Exposes the pipeline via a JSON API for integration with Cursor,
    /// Claude, and other MCP-compatible AI tools.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Bundled catalog subcommands.
#[derive(Subcommand)]
enum IndicatorsAction {
    /// List commonly requested indicators grouped by category.
    Popular,

    /// Search the bundled metadata by code fragment or keyword.
    Search {
        /// Code fragment or keyword, e.g. `SP_POP` or "literacy".
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the MCP tool server on the address in `[server].bind`.
    Mcp,
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Search { query, top } => {
            let client = StatApiClient::new(&cfg.api)?;
            let provider = create_provider(&cfg.ai)?;
            let top = top.unwrap_or(cfg.retrieval.default_top);
            let outcome =
                orchestrated_search(&client, provider.as_ref(), &NullExtractor, &query, top).await;
            print_json(&outcome)?;
        }
        Commands::Retrieve {
            indicator,
            database,
            year,
            countries,
            sex,
            age,
            limit,
            sort_order,
            include_aggregates,
            raw,
        } => {
            let client = StatApiClient::new(&cfg.api)?;
            let query = DataQuery {
                indicator,
                database,
                year,
                countries,
                sex,
                age,
            };
            let opts = ShapeOptions {
                limit: Some(limit.unwrap_or(cfg.retrieval.default_limit).max(0) as usize),
                sort_order: Some(sort_order.unwrap_or_else(|| cfg.retrieval.sort_order.clone())),
                exclude_aggregates: !include_aggregates && cfg.retrieval.exclude_aggregates,
                compact: !raw && cfg.retrieval.compact_response,
            };
            let outcome = retrieve_data(&client, &query, &opts).await;
            print_json(&outcome)?;
        }
        Commands::Coverage {
            indicator,
            database,
        } => {
            let client = StatApiClient::new(&cfg.api)?;
            let outcome = get_temporal_coverage(&client, &indicator, &database).await;
            print_json(&outcome)?;
        }
        Commands::Indicators { action } => {
            let cache = CatalogCache::new(&cfg.catalog);
            match action {
                IndicatorsAction::Popular => {
                    print_json(&list_popular_indicators(&cache))?;
                }
                IndicatorsAction::Search { query, limit } => {
                    let limit = limit.unwrap_or(cfg.retrieval.default_limit.max(0) as usize);
                    print_json(&search_local_indicators(&cache, &query, limit))?;
                }
            }
        }
        Commands::Agent { question } => {
            if !cfg.ai.is_enabled() {
                anyhow::bail!(
                    "agent mode requires an AI provider; set [ai] provider = \"openai\" in {}",
                    cli.config.display()
                );
            }
            let client = StatApiClient::new(&cfg.api)?;
            let provider = create_provider(&cfg.ai)?;
            let outcome =
                run_agent(&client, provider.as_ref(), &NullExtractor, &cfg, &question).await;
            print_json(&outcome)?;
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
