//! WKC CLI
//!
//! Command-line front end for business-term column mapping:
//! - Applying a CSV worklist (`map`), row by row or in bulk per asset
//! - Looking up catalog / category / business term / asset ids
//! - Creating, showing, updating and deleting an asset's `column_info`

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use wkc_client::config::{parse_backoff_factor, HOST_ENV};
use wkc_client::{
    CancelToken, ClientConfig, DirectTokenSource, FileTokenSource, HttpBackend, MappingDriver,
    MappingOptions, MappingReport, PromptTokenSource, ReqwestBackend, Resolved, Strategy,
    TokenSource, WkcClient, WkcError,
};

#[derive(Parser)]
#[command(name = "wkc")]
#[command(
    author,
    version,
    about = "Map data asset columns to business terms in a governance catalog"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Append ERROR-level events to this file.
    #[arg(long, global = true)]
    error_log: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ConnectionArgs {
    /// Base URL of the cluster, e.g. https://cpd.example.com
    #[arg(long, env = "WKC_HOST", global = true)]
    host: Option<String>,

    /// JSON file with {"username": ..., "password": ...}; wins over --username/--password.
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    #[arg(long, env = "WKC_USERNAME", global = true)]
    username: Option<String>,

    #[arg(long, env = "WKC_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Retries on status 500/504 after the first attempt.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Seconds; the n-th retry waits factor * 2^(n-1).
    #[arg(long, global = true, value_parser = backoff_factor_arg)]
    backoff_factor: Option<f64>,

    /// Timeout of plain (non-search, non-update) calls, in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a CSV worklist (Catalog,DataAsset,ColumnHeader,BusinessTerm,Category,Done).
    ///
    /// Rows marked `Done=Y` are skipped; successful rows are flipped to `Y` and
    /// the file is rewritten in place, also when the run fails or is interrupted.
    Map {
        /// Worklist CSV file
        worklist: PathBuf,
        /// One attribute call per asset instead of one per column
        #[arg(long)]
        bulk: bool,
        /// Passes over an asset's pending rows before giving up
        #[arg(long, default_value_t = 5)]
        max_sweeps: u32,
        /// Look business terms up under the full category path instead of its leaf
        #[arg(long)]
        full_category_path: bool,
    },

    /// Print a catalog id.
    CatalogId { name: String },

    /// Print a category id for a `>>` path.
    CategoryId { path: String },

    /// Print a business term id.
    TermId {
        term: String,
        #[arg(long)]
        category: String,
    },

    /// Print an asset id.
    AssetId {
        asset: String,
        #[arg(long)]
        catalog: String,
    },

    /// List every asset of a catalog.
    Assets {
        #[arg(long)]
        catalog: String,
    },

    /// List every business term of a category.
    Terms {
        #[arg(long)]
        category: String,
    },

    /// Show an asset document.
    AssetInfo {
        asset: String,
        #[arg(long)]
        catalog: String,
    },

    /// Manage the `column_info` attribute of one asset.
    Attr {
        #[command(subcommand)]
        command: AttrCommands,
    },
}

#[derive(Subcommand)]
enum AttrCommands {
    /// Create an empty `column_info` (tolerates an existing one).
    Create {
        asset: String,
        #[arg(long)]
        catalog: String,
    },
    /// Show the current `column_info`.
    Show {
        asset: String,
        #[arg(long)]
        catalog: String,
    },
    /// Point one column at a business term (replaces the column's terms).
    Update {
        asset: String,
        #[arg(long)]
        catalog: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        term: String,
        #[arg(long)]
        category: String,
    },
    /// Delete `column_info`.
    Delete {
        asset: String,
        #[arg(long)]
        catalog: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.error_log.as_ref())?;

    if let Err(e) = run(cli) {
        // The console layer prints it; the error-log layer records it.
        error!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: u8, error_log: Option<&PathBuf>) -> Result<()> {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,wkc_client={default_level},wkc={default_level}"
        ))
    });
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let error_file = match error_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open error log {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::ERROR),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(error_file)
        .init();
    Ok(())
}

fn backoff_factor_arg(raw: &str) -> Result<f64, String> {
    parse_backoff_factor("--backoff-factor", raw).map_err(|e| e.to_string())
}

fn client_config(args: &ConnectionArgs) -> Result<ClientConfig> {
    let host = args
        .host
        .clone()
        .ok_or_else(|| anyhow!("no host given (use --host or {HOST_ENV})"))?;
    let mut config = ClientConfig::from_lookup(|key| {
        if key == HOST_ENV {
            Some(host.clone())
        } else {
            env::var(key).ok()
        }
    })?;

    if let Some(total) = args.max_retries {
        config.retry.total = total;
    }
    if let Some(factor) = args.backoff_factor {
        config.retry.backoff_factor = factor;
        config.update_retry.backoff_factor = factor;
    }
    if let Some(secs) = args.timeout_secs {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(anyhow!("--timeout-secs must be a positive number"));
        }
        config.timeouts.default = std::time::Duration::from_secs_f64(secs);
    }
    Ok(config)
}

fn token_source(args: &ConnectionArgs) -> Box<dyn TokenSource> {
    match (&args.credentials, &args.username, &args.password) {
        (Some(path), _, _) => Box::new(FileTokenSource::new(path)),
        (None, Some(user), Some(password)) => Box::new(DirectTokenSource::new(user, password)),
        _ => Box::new(PromptTokenSource),
    }
}

fn connect(args: &ConnectionArgs) -> Result<WkcClient> {
    let config = client_config(args)?;
    let backend: Arc<dyn HttpBackend> = Arc::new(ReqwestBackend::new()?);
    let tokens = token_source(args);
    WkcClient::connect(config, backend, tokens.as_ref()).context("login failed")
}

fn run(cli: Cli) -> Result<()> {
    let client = connect(&cli.connection)?;
    let resolver = client.resolver();

    match cli.command {
        Commands::Map {
            worklist,
            bulk,
            max_sweeps,
            full_category_path,
        } => {
            let options = MappingOptions {
                strategy: if bulk { Strategy::Bulk } else { Strategy::RowByRow },
                max_sweeps,
                leaf_category_only: !full_category_path,
            };
            cmd_map(&client, options, worklist)?;
        }
        Commands::CatalogId { name } => {
            print_id(&name, resolver.catalog_id(&name)?);
        }
        Commands::CategoryId { path } => {
            print_id(&path, resolver.category_id(&path)?);
        }
        Commands::TermId { term, category } => {
            print_id(&term, resolver.term_id(&term, &category)?);
        }
        Commands::AssetId { asset, catalog } => {
            print_id(&asset, resolver.asset_id(&asset, &catalog)?);
        }
        Commands::Assets { catalog } => {
            if let Some(assets) = found(resolver.list_assets(&catalog)?) {
                println!("{} {} assets in {}", "ok".green().bold(), assets.len(), catalog.bold());
                for (name, id) in assets {
                    println!("  {} {name}: {id}", "→".cyan());
                }
            }
        }
        Commands::Terms { category } => {
            if let Some(terms) = found(resolver.term_map(&category)?) {
                println!("{} {} terms in {}", "ok".green().bold(), terms.len(), category.bold());
                for (name, id) in terms.iter() {
                    println!("  {} {name}: {id}", "→".cyan());
                }
            }
        }
        Commands::AssetInfo { asset, catalog } => {
            if let Some(info) = found(client.view_asset_info(&asset, &catalog)?) {
                print_json(&info)?;
            }
        }
        Commands::Attr { command } => cmd_attr(&client, command)?,
    }
    Ok(())
}

fn cmd_attr(client: &WkcClient, command: AttrCommands) -> Result<()> {
    match command {
        AttrCommands::Create { asset, catalog } => {
            if let Some(outcome) = found(client.create_attribute(&asset, &catalog)?) {
                println!("{} {outcome:?}", "column_info".green().bold());
            }
        }
        AttrCommands::Show { asset, catalog } => {
            if let Some(value) = found(client.view_attribute(&asset, &catalog)?) {
                print_json(&value)?;
            }
        }
        AttrCommands::Update {
            asset,
            catalog,
            column,
            term,
            category,
        } => {
            let result = client.update_attribute(&asset, &catalog, &column, &term, &category)?;
            if found(result).is_some() {
                println!(
                    "{} {asset}.{column} {} {term}",
                    "updated".green().bold(),
                    "→".cyan()
                );
            }
        }
        AttrCommands::Delete { asset, catalog } => {
            if found(client.delete_attribute(&asset, &catalog)?).is_some() {
                println!("{} column_info of {asset}", "deleted".green().bold());
            }
        }
    }
    Ok(())
}

fn cmd_map(client: &WkcClient, options: MappingOptions, worklist: PathBuf) -> Result<()> {
    // First Ctrl-C stops at the next row boundary; a second one exits at once.
    let cancel = CancelToken::new();
    flag::register_conditional_shutdown(SIGINT, 130, cancel.flag())
        .context("failed to install SIGINT handler")?;
    flag::register(SIGINT, cancel.flag()).context("failed to install SIGINT handler")?;

    println!(
        "{} {} ({:?})",
        "Mapping".green().bold(),
        worklist.display(),
        options.strategy
    );
    let result = MappingDriver::new(client, options)
        .with_cancel(cancel)
        .run_file(&worklist);

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(WkcError::Cancelled) => Err(anyhow!(
            "interrupted; progress saved to {}",
            worklist.display()
        )),
        Err(e) => Err(anyhow::Error::new(e).context(format!(
            "mapping stopped; progress saved to {}",
            worklist.display()
        ))),
    }
}

fn print_report(report: &MappingReport) {
    for asset in &report.assets {
        if asset.sweeps == 0 {
            continue;
        }
        println!(
            "  {} {}: {} mapped, {} pending, {:.2}s",
            "→".cyan(),
            asset.data_asset,
            asset.mapped,
            asset.pending,
            asset.elapsed.as_secs_f64()
        );
    }
    for row in &report.pending {
        println!(
            "  {} row {} ({}.{}): {}",
            "→".yellow(),
            row.index + 1,
            row.data_asset,
            row.column_header,
            row.reason
        );
    }

    let status = if report.is_complete() {
        "ok".green().bold()
    } else {
        "partial".yellow().bold()
    };
    println!(
        "{status} {} of {} rows mapped ({} already done) in {:.2}s",
        report.mapped,
        report.attempted(),
        report.already_done,
        report.elapsed.as_secs_f64()
    );
    if let Some(rate) = report.seconds_per_row() {
        println!("  {} {rate:.3}s per row", "→".cyan());
    }
}

fn found<T>(resolved: Resolved<T>) -> Option<T> {
    match resolved {
        Ok(value) => Some(value),
        Err(missing) => {
            println!("{} {missing}", "not found:".yellow().bold());
            None
        }
    }
}

fn print_id(name: &str, resolved: Resolved<String>) {
    if let Some(id) = found(resolved) {
        println!("{} {}", name.bold(), id);
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
