//! Motif CLI - pattern mining and explainability over per-user event logs

use anyhow::Result;
use clap::{Parser, Subcommand};
use motif_cli::commands::{self, PatternReport};
use motif_cli::config::Config;
use motif_cluster::ModelKey;
use motif_runtime::{CountType, ITreeRequest};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "motif")]
#[command(author = "Motif Contributors")]
#[command(version)]
#[command(about = "Motif - pattern mining and explainability engine", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "MOTIF_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect the property schema of an event log
    Schema {
        /// NDJSON event log, sorted by user then timestamp
        #[arg(short, long)]
        log: PathBuf,
    },

    /// Count patterns exactly in one pass
    Count {
        #[arg(short, long)]
        log: PathBuf,

        /// Comma-separated event names, e.g. signup,cart,purchase (repeatable)
        #[arg(short, long = "pattern", required = true)]
        patterns: Vec<String>,

        /// Also count non-overlapping occurrences
        #[arg(long)]
        occurrences: bool,
    },

    /// Mine frequent patterns level by level and write a chunked model
    Mine {
        #[arg(short, long)]
        log: PathBuf,

        #[arg(long)]
        project: String,

        #[arg(long)]
        model: String,

        /// Chunk store root (defaults to server.chunk_root)
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        max_length: Option<usize>,

        #[arg(long)]
        min_support: Option<u64>,
    },

    /// Explain what leads users to a goal event
    Itree {
        /// Chunk store root (defaults to server.chunk_root)
        #[arg(long)]
        store: Option<PathBuf>,

        #[arg(long)]
        project: String,

        /// Model id (defaults to the latest model of the project)
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        goal: String,

        #[arg(long)]
        start: Option<String>,

        /// Count occurrences instead of users
        #[arg(long)]
        occurrences: bool,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective or an example configuration
    Config {
        /// Print an example configuration instead of the effective one
        #[arg(long)]
        example: bool,

        /// Print TOML instead of YAML
        #[arg(long)]
        toml: bool,
    },
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.is_json() {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::default();
    if let Some(path) = &cli.config {
        config.merge(Config::load(path)?);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config);

    match cli.command {
        Commands::Schema { log } => {
            let (schema, stats) = commands::schema(&log)?;
            info!(events = stats.events, users = stats.users, "Schema collected");
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        Commands::Count {
            log,
            patterns,
            occurrences,
        } => {
            let patterns = patterns
                .iter()
                .map(|p| commands::parse_pattern(p))
                .collect::<Result<Vec<_>>>()?;
            if occurrences {
                config.counting.occurrence_counting = true;
            }
            let (counted, summary) = commands::count(&log, &patterns, &config)?;
            info!(users = summary.users, elapsed_ms = summary.elapsed_ms, "Counting finished");
            let reports: Vec<PatternReport> = counted.iter().map(PatternReport::from).collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }

        Commands::Mine {
            log,
            project,
            model,
            out,
            max_length,
            min_support,
        } => {
            if let Some(max_length) = max_length {
                config.counting.max_length = max_length;
            }
            if let Some(min_support) = min_support {
                config.counting.min_support = min_support;
            }
            let key = ModelKey::new(project, model)?;
            let root = out.unwrap_or_else(|| config.server.chunk_root.clone());
            let report = commands::mine(&log, &key, &root, &config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Itree {
            store,
            project,
            model,
            goal,
            start,
            occurrences,
            json,
        } => {
            let mut request = ITreeRequest::new(format!("cli-{}", std::process::id()), goal);
            if let Some(start) = start {
                request = request.with_start(start);
            }
            if occurrences {
                request = request.with_count_type(CountType::PerOccurrence);
            }
            let root = store.unwrap_or_else(|| config.server.chunk_root.clone());
            let tree = commands::itree(&root, &project, model.as_deref(), &request, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print!("{}", commands::render_tree(&tree));
            }
        }

        Commands::Config {
            example,
            toml: as_toml,
        } => {
            let content = match (example, as_toml) {
                (true, false) => Config::example_yaml(),
                (true, true) => Config::example_toml(),
                (false, false) => serde_yaml::to_string(&config)?,
                (false, true) => toml::to_string_pretty(&config)?,
            };
            println!("{}", content);
        }
    }

    Ok(())
}
