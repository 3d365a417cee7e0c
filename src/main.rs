//! docs-kb CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use docs_kb::{
    commands::{
        cmd_delete, cmd_ingest, cmd_init, cmd_list, cmd_query, cmd_show, cmd_sync, cmd_sync_all,
        print_delete_report, print_ingest_stats, print_init_report, print_query_results,
        print_repositories, print_repository, print_sync_all_report, print_sync_report,
        CommandContext, InitOptions, SyncOptions,
    },
    config::Config,
    embed::create_embedder,
    error::{Error, Result},
    kb::QdrantKnowledgeBase,
    manifest::ManifestStore,
    mcp::McpServer,
    progress::{hide_progress, LogWriterFactory},
    remote::GitHubClient,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docs-kb")]
#[command(version, about = "Sync GitHub documentation into a searchable knowledge base", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "DOCS_KB_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration and create the database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Ingest a repository's documentation for the first time
    Ingest {
        /// Repository in owner/repo form
        repository: String,

        /// Branch to track (defaults to sync.default_branch)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Bring tracked repositories up to date with upstream
    Sync {
        /// Repository in owner/repo form
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        repository: Option<String>,

        /// Sync every tracked repository
        #[arg(long)]
        all: bool,

        /// Show what would change without applying it
        #[arg(long)]
        dry_run: bool,

        /// Accept an empty upstream listing and remove every tracked file
        #[arg(long)]
        allow_empty: bool,
    },

    /// List tracked repositories
    List,

    /// Show a tracked repository and its latest run
    Show {
        /// Repository in owner/repo form
        repository: String,
    },

    /// Stop tracking a repository and drop its knowledge base
    Delete {
        /// Repository in owner/repo form
        repository: String,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Search a repository's knowledge base
    Query {
        /// Repository in owner/repo form
        repository: String,

        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Start MCP server on stdio
    Mcp,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries JSON or the MCP protocol; keep logs on plain stderr
    if cli.json || matches!(cli.command, Commands::Mcp) {
        hide_progress();
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(LogWriterFactory::default()))
            .init();
    }
}

fn emit<T: Serialize>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(Config::default_config_path)
}

async fn open_store(path: &Path) -> Result<ManifestStore> {
    let store = ManifestStore::connect(path).await?;
    store.migrate().await?;
    Ok(store)
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        Commands::Init { force } => {
            let report = cmd_init(InitOptions {
                config_path: config_path(&cli),
                force: *force,
            })
            .await?;
            return emit(cli.json, &report, print_init_report);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "docs-kb", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load(&config_path(&cli))?;
    let store = open_store(&config.paths.db_file).await?;

    match &cli.command {
        Commands::List => {
            let repositories = cmd_list(&store).await?;
            return emit(cli.json, &repositories, |r| print_repositories(r));
        }
        Commands::Show { repository } => {
            let detail = cmd_show(&store, repository).await?;
            return emit(cli.json, &detail, print_repository);
        }
        _ => {}
    }

    let github = GitHubClient::new(&config.github)?;
    let embedder = create_embedder(&config.embedding)?;
    let kb = QdrantKnowledgeBase::connect(&config, embedder)?;
    let ctx = CommandContext {
        config: &config,
        store: &store,
        lister: &github,
        fetcher: &github,
        kb: &kb,
    };

    match cli.command {
        Commands::Init { .. }
        | Commands::Completions { .. }
        | Commands::List
        | Commands::Show { .. } => Ok(()),

        Commands::Ingest { repository, branch } => {
            let stats = cmd_ingest(&ctx, &repository, branch.as_deref()).await?;
            emit(cli.json, &stats, print_ingest_stats)
        }

        Commands::Sync {
            repository,
            all,
            dry_run,
            allow_empty,
        } => {
            let options = SyncOptions {
                dry_run,
                allow_empty,
            };

            match repository {
                Some(name) if !all => {
                    let report = cmd_sync(&ctx, &name, options).await?;
                    emit(cli.json, &report, print_sync_report)
                }
                _ => {
                    let report = cmd_sync_all(&ctx, options).await?;
                    emit(cli.json, &report, print_sync_all_report)?;
                    if report.errors.is_empty() {
                        Ok(())
                    } else {
                        Err(Error::Other(format!(
                            "{} of {} repositories failed to sync",
                            report.errors.len(),
                            report.errors.len() + report.reports.len()
                        )))
                    }
                }
            }
        }

        Commands::Delete { repository, yes } => {
            if !yes {
                return Err(Error::Other(format!(
                    "Refusing to delete {} without --yes",
                    repository
                )));
            }
            let report = cmd_delete(&store, &kb, &repository).await?;
            emit(cli.json, &report, print_delete_report)?;
            match report.gateway_error {
                Some(e) => Err(Error::Qdrant(format!(
                    "record removed but collection {} was not dropped: {}",
                    report.knowledge_base_name, e
                ))),
                None => Ok(()),
            }
        }

        Commands::Query {
            repository,
            query,
            limit,
        } => {
            let result = cmd_query(&config, &store, &kb, &repository, &query, limit).await?;
            emit(cli.json, &result, print_query_results)
        }

        Commands::Mcp => {
            match github.validate_token().await {
                Ok(Some(login)) => info!("GitHub requests authenticated as {}", login),
                Ok(None) => {}
                Err(e) => warn!("GitHub token rejected: {}", e),
            }
            McpServer::new(ctx).run().await
        }
    }
}
