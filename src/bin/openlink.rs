//! openlink CLI: resolve lookups and poll their progress.
//!
//! Usage:
//!   openlink resolve --session <id> [--tag fulltext] key=value... [--db path] [--config file]
//!   openlink progress <request-id> [--tag fulltext] [--db path] [--config file]
//!   openlink services [--config file]

use clap::{Parser, Subcommand};
use openlink::{
    params_from_pairs, Config, OpenStore, Progress, RequestId, Resolver, SqliteStore, TypeTag,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "openlink",
    version,
    about = "Citation lookup resolution and service fan-out"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML service configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a citation and dispatch the configured services
    Resolve {
        /// Session the lookup belongs to
        #[arg(long)]
        session: String,
        /// Tags to report on (default: every tag a service declares)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Lookup parameters as key=value
        #[arg(required = true)]
        params: Vec<String>,
    },
    /// Show the progress of a request
    Progress {
        /// Request ID printed by `resolve`
        request_id: String,
        /// Tags to report on (default: every tag a service declares)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List the configured services
    Services,
}

/// Get the default database path (~/.local/share/openlink/openlink.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let openlink_dir = data_dir.join("openlink");
    std::fs::create_dir_all(&openlink_dir).ok();
    openlink_dir.join("openlink.db")
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path)
            .map_err(|e| format!("Failed to load config {}: {}", path.display(), e)),
        None => Ok(Config::default()),
    }
}

fn open_resolver(db: Option<PathBuf>, config: &Config) -> Result<Resolver, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    let store =
        SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Resolver::from_config(Arc::new(store), config).map_err(|e| e.to_string())
}

/// Split `key=value` arguments; a bare key gets an empty value
fn parse_params(args: &[String]) -> Vec<(String, String)> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (arg.clone(), String::new()),
        })
        .collect()
}

/// Requested tags, or every tag the configured services declare
fn report_tags(requested: &[String], resolver: &Resolver) -> Vec<TypeTag> {
    if !requested.is_empty() {
        return requested.iter().map(|t| TypeTag::from(t.as_str())).collect();
    }
    let mut tags: Vec<TypeTag> = resolver
        .services()
        .services()
        .iter()
        .flat_map(|r| r.service.type_tags().iter().cloned())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn print_progress(progress: &Progress) -> i32 {
    match serde_json::to_string_pretty(progress) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_resolve(
    resolver: &Resolver,
    session: &str,
    tags: &[String],
    params: &[String],
) -> i32 {
    let params = params_from_pairs(parse_params(params));
    // Background services must finish before the process exits
    let resolution = match resolver.resolve_and_wait(session, &params).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let tags = report_tags(tags, resolver);
    match resolver.progress(&resolution.request.id, &tags) {
        Ok(progress) => print_progress(&progress),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_progress(resolver: &Resolver, request_id: &str, tags: &[String]) -> i32 {
    let tags = report_tags(tags, resolver);
    match resolver.progress(&RequestId::from_string(request_id), &tags) {
        Ok(progress) => print_progress(&progress),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_services(config: &Config) -> i32 {
    if config.services.is_empty() {
        println!("No services configured.");
        return 0;
    }
    println!("{:<24}  {:<10}  {}", "ID", "TIER", "TAGS");
    println!("{}", "-".repeat(60));
    for spec in &config.services {
        let tags: Vec<&str> = spec.type_tags.iter().map(TypeTag::as_str).collect();
        println!("{:<24}  {:<10}  {}", spec.id, spec.tier.as_str(), tags.join(", "));
    }
    0
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let config = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Commands::Services = cli.command {
        std::process::exit(cmd_services(&config));
    }

    let resolver = match open_resolver(cli.db, &config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let code = match cli.command {
        Commands::Resolve {
            session,
            tags,
            params,
        } => cmd_resolve(&resolver, &session, &tags, &params).await,
        Commands::Progress { request_id, tags } => cmd_progress(&resolver, &request_id, &tags),
        Commands::Services => cmd_services(&config),
    };
    std::process::exit(code);
}
