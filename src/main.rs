//! # freva CLI
//!
//! A thin command-line wrapper around the `evaluation_system` library:
//! run and list plugins, browse the run history, crawl data directories
//! into the search index and query it.
//!
//! ## Usage
//!
//! ```bash
//! freva --config /etc/freva/evaluation_system.conf <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `freva plugin list` | List registered plugins |
//! | `freva plugin run <tool> k=v…` | Run (or schedule) a plugin |
//! | `freva history` | Show recorded runs |
//! | `freva crawl dump <dir> <manifest>` | Walk a directory into a crawl manifest |
//! | `freva crawl load <manifest>` | Index a crawl manifest |
//! | `freva databrowser k=v…` | Search the file catalog |
//! | `freva scheduler cancel <id>` | Cancel a batch job |
//!
//! Exit codes: `0` success, `1` error, `2` bad arguments, `130` interrupted.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evaluation_system::config::{Config, ConfigHandle};
use evaluation_system::crawler::{self, DumpOptions, LoadOptions, StrictMode};
use evaluation_system::databrowser::{Databrowser, SearchRequest};
use evaluation_system::history::{HistoryQuery, HistoryStore};
use evaluation_system::invoke::{Engine, RunOptions, RunOutcome};
use evaluation_system::registry::{PluginRegistry, PLUGINS_ENV};
use evaluation_system::scheduler::{self, SystemRunner};
use evaluation_system::solr::IndexCores;
use evaluation_system::user::{SystemUserProvider, UserProvider};

/// freva: plugin execution and data catalog of the evaluation system.
#[derive(Parser)]
#[command(name = "freva", version, about = "Run evaluation plugins and search the data catalog")]
struct Cli {
    /// Path to the evaluation system configuration file.
    ///
    /// Defaults to `$EVALUATION_SYSTEM_CONFIG_FILE`, then
    /// `$EVALUATION_SYSTEM_HOME/freva/evaluation_system.conf`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging and full error chains.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List and run plugins.
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Show recorded plugin runs, newest first.
    History {
        #[arg(long)]
        tool: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: i64,

        /// Earliest timestamp, any prefix of `YYYY-MM-DDTHH:MM:SS.ffffff`.
        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        /// Comma separated history ids.
        #[arg(long, value_delimiter = ',')]
        entry_ids: Vec<i64>,
    },

    /// Crawl data directories into the search index.
    Crawl {
        #[command(subcommand)]
        action: CrawlAction,
    },

    /// Search the file catalog with `facet=value` constraints.
    Databrowser {
        /// `facet=value` pairs; repeat a facet to OR its values.
        facets: Vec<String>,

        /// Print the number of matches only.
        #[arg(long)]
        count: bool,

        /// Print the searchable facet names.
        #[arg(long)]
        attributes: bool,

        /// Print value counts of this facet (repeatable).
        #[arg(long)]
        facet: Vec<String>,

        /// Search every version instead of the latest ones.
        #[arg(long)]
        all_versions: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Batch system operations.
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },
}

#[derive(Subcommand)]
enum PluginAction {
    /// List registered plugins.
    List,

    /// Run a plugin with `name=value` arguments.
    Run {
        tool: String,

        /// `name=value` arguments.
        args: Vec<String>,

        /// Submit to the batch system instead of running here.
        #[arg(long)]
        batchmode: bool,

        /// Caption stored with the results.
        #[arg(long)]
        caption: Option<String>,

        /// Save the configuration to the user's config directory.
        #[arg(long)]
        save: bool,

        /// Save the configuration to this file.
        #[arg(long)]
        save_config: Option<PathBuf>,

        /// Print the resolved configuration without running.
        #[arg(long)]
        show_config: bool,

        /// Run a previously scheduled history entry.
        #[arg(long)]
        scheduled_id: Option<i64>,
    },
}

#[derive(Subcommand)]
enum CrawlAction {
    /// Walk a directory and write a crawl manifest (`.gz` compresses).
    Dump {
        dir: PathBuf,
        manifest: PathBuf,

        /// Only accept paths of this DRS type.
        #[arg(long)]
        drs_type: Option<String>,

        /// Leave out files that are not valid DRS paths.
        #[arg(long)]
        strict: bool,

        /// With `--strict`, fail on the first invalid path instead.
        #[arg(long)]
        abort_on_errors: bool,
    },

    /// Index a crawl manifest into both cores.
    Load {
        manifest: PathBuf,

        #[arg(long, default_value_t = 1000)]
        chunk_size: usize,

        #[arg(long)]
        abort_on_errors: bool,
    },
}

#[derive(Subcommand)]
enum SchedulerAction {
    /// Cancel a job of the configured batch system.
    Cancel { job_id: String },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let debug = cli.debug;

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(async {
        tokio::select! {
            result = run(cli) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    });

    match result {
        None => ExitCode::from(130),
        Some(Ok(())) => ExitCode::SUCCESS,
        Some(Err(err)) => exit_code_for(&err, debug),
    }
}

fn exit_code_for(err: &anyhow::Error, debug: bool) -> ExitCode {
    let broken_pipe = err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    });
    if broken_pipe {
        return ExitCode::SUCCESS;
    }

    if debug {
        eprintln!("Error: {:?}", err);
    } else {
        eprintln!("Error: {:#}", err);
    }
    let usage = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<evaluation_system::Error>())
        .any(evaluation_system::Error::is_usage_error);
    ExitCode::from(if usage { 2 } else { 1 })
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .context("Failed to load configuration")?;
    config.resolve_secrets().await;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref()).await?;

    match cli.command {
        Commands::Plugin { action } => run_plugin_command(config, action).await,
        Commands::History {
            tool,
            limit,
            since,
            until,
            entry_ids,
        } => {
            let history = HistoryStore::from_config(&config)
                .await
                .context("Failed to open history database")?;
            let user = SystemUserProvider.current_user()?;
            let mut query = HistoryQuery::new().limit(limit).uid(&user.name).entry_ids(entry_ids);
            if let Some(tool) = &tool {
                query = query.tool(tool);
            }
            if let Some(since) = &since {
                query = query.since(since);
            }
            if let Some(until) = &until {
                query = query.until(until);
            }
            let entries = history.get_history(&query).await?;

            let mut out = io::stdout().lock();
            for entry in entries {
                writeln!(
                    out,
                    "{}) {} v{} [{}] {}",
                    entry.id,
                    entry.tool,
                    entry.version,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.status
                )?;
                writeln!(out, "   {}", entry.configuration)?;
            }
            Ok(())
        }
        Commands::Crawl { action } => match action {
            CrawlAction::Dump {
                dir,
                manifest,
                drs_type,
                strict,
                abort_on_errors,
            } => {
                let strict = match (strict, abort_on_errors) {
                    (false, _) => StrictMode::Off,
                    (true, false) => StrictMode::Skip,
                    (true, true) => StrictMode::Abort,
                };
                let opts = DumpOptions { drs_type, strict };
                let drs = config.get_drs_config().ok();
                let stats = crawler::dump(drs, &dir, &manifest, &opts)
                    .with_context(|| format!("Failed to crawl {}", dir.display()))?;
                println!(
                    "Wrote {} files to {} ({} skipped)",
                    stats.files,
                    manifest.display(),
                    stats.skipped
                );
                Ok(())
            }
            CrawlAction::Load {
                manifest,
                chunk_size,
                abort_on_errors,
            } => {
                let drs = config.get_drs_config()?;
                let cores = IndexCores::from_config(&config)?;
                let opts = LoadOptions {
                    chunk_size: chunk_size.max(1),
                    abort_on_errors,
                };
                let stats = crawler::load(&cores, drs, &manifest, &opts)
                    .await
                    .with_context(|| format!("Failed to load {}", manifest.display()))?;
                println!(
                    "Indexed {} files ({} latest, {} skipped, {} failed chunks)",
                    stats.files, stats.latest, stats.skipped, stats.failed_chunks
                );
                Ok(())
            }
        },
        Commands::Databrowser {
            facets,
            count,
            attributes,
            facet,
            all_versions,
            limit,
        } => {
            let browser = Databrowser::new(
                IndexCores::from_config(&config)?,
                config.get_drs_config().ok().cloned(),
            );
            let mut req = SearchRequest::from_tokens(&facets)?;
            req.latest_only = !all_versions;
            if let Some(limit) = limit {
                req.rows = limit;
            }

            if attributes {
                let names = browser.attributes(None)?;
                let mut out = io::stdout().lock();
                for name in names {
                    writeln!(out, "{}", name)?;
                }
            } else if count {
                let n = browser.count(&req).await?;
                writeln!(io::stdout().lock(), "{}", n)?;
            } else if !facet.is_empty() {
                let values = browser.facet_values(&req, &facet).await?;
                let mut out = io::stdout().lock();
                for (field, counts) in values {
                    let rendered: Vec<String> =
                        counts.iter().map(|(v, n)| format!("{} ({})", v, n)).collect();
                    writeln!(out, "{}: {}", field, rendered.join(", "))?;
                }
            } else {
                let files = browser.search_files(&req).await?;
                let mut out = io::stdout().lock();
                for file in files {
                    writeln!(out, "{}", file)?;
                }
            }
            Ok(())
        }
        Commands::Scheduler {
            action: SchedulerAction::Cancel { job_id },
        } => {
            let driver = config.scheduler_system()?.driver();
            scheduler::cancel_job(driver.as_ref(), &job_id, &SystemRunner).await?;
            println!("Cancelled job {}", job_id);
            Ok(())
        }
    }
}

async fn run_plugin_command(config: Config, action: PluginAction) -> anyhow::Result<()> {
    let env_plugins = std::env::var(PLUGINS_ENV).ok();
    let registry = PluginRegistry::from_config(&config, env_plugins.as_deref());

    match action {
        PluginAction::List => {
            let mut out = io::stdout().lock();
            for plugin in registry.list() {
                writeln!(
                    out,
                    "{:<24} {:<16} {}",
                    plugin.name(),
                    plugin.meta.category,
                    plugin.meta.short_description
                )?;
            }
            Ok(())
        }
        PluginAction::Run {
            tool,
            args,
            batchmode,
            caption,
            save,
            save_config,
            show_config,
            scheduled_id,
        } => {
            let history = HistoryStore::from_config(&config)
                .await
                .context("Failed to open history database")?;
            let cores = IndexCores::from_config(&config).ok();
            let mut engine = Engine::new(ConfigHandle::new(config), registry, history)
                .with_users(Arc::new(SystemUserProvider));
            if let Some(cores) = cores {
                engine = engine.with_index(cores);
            }

            let opts = RunOptions {
                batchmode,
                caption,
                save,
                save_config,
                show_config,
                scheduled_id,
            };
            match engine.run_plugin(&tool, &args, &opts).await? {
                RunOutcome::ConfigShown(text) => {
                    write!(io::stdout().lock(), "{}", text)?;
                }
                RunOutcome::ConfigSaved(path) => {
                    println!("Configuration saved to {}", path.display());
                }
                RunOutcome::Finished {
                    row_id,
                    status,
                    outputs,
                } => {
                    let mut out = io::stdout().lock();
                    writeln!(out, "{} finished as entry {} ({})", tool, row_id, status)?;
                    for path in outputs {
                        writeln!(out, "  {}", path.display())?;
                    }
                }
                RunOutcome::Scheduled {
                    row_id,
                    job_id,
                    script,
                } => {
                    println!(
                        "{} scheduled as entry {} (job {}, script {})",
                        tool,
                        row_id,
                        job_id,
                        script.display()
                    );
                }
            }
            Ok(())
        }
    }
}
