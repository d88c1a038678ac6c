use std::{path::PathBuf, sync::Arc};

use chatvault::{
    archive::create_cold_store,
    config::ChatvaultConfig,
    jobs::{
        ArchiveError, Archiver, Pruner, start_archival_worker, start_pruning_worker,
    },
    leases::create_lease_store,
    observability::{self, metrics},
    records::create_record_store,
};
use chrono::Utc;
use clap::Parser;

const DEFAULT_CONFIG_FILE: &str = "chatvault.toml";

/// CLI arguments for chatvault
#[derive(Parser, Debug)]
#[command(version, about = "Chat message retention pipeline", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./chatvault.toml if it exists,
    /// otherwise built-in in-memory defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the archiver and pruner on their schedules (default)
    Run,
    /// Run a single archival pass and print the report as JSON
    ///
    /// Intended for external schedulers such as cron or a Kubernetes CronJob.
    Archive {
        /// Log what would be archived without writing or deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a single pruning pass and print the report as JSON
    Prune {
        /// Log what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./chatvault.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show enabled compile-time features
    Features,
}

/// Starter configuration written by `chatvault init`.
fn default_config_toml() -> &'static str {
    r#"# chatvault configuration
# Environment variables can be referenced as ${VAR_NAME}.

[records]
type = "sqlite"
path = "chatvault.db"

[archive]
backend = "filesystem"
prefix = "chat-archives"

[archive.filesystem]
path = "archive"

[leases]
type = "memory"

[jobs.archiver]
hot_retention = { months = 3 }
bucket_strategy = "message_month"
verify_writes = true

[jobs.archiver.schedule]
every = "week"
weekday = "sunday"
hour = 3

[jobs.archiver.safety]
dry_run = false
max_concurrency = 4

[jobs.pruner]
cold_retention = { years = 1 }

[jobs.pruner.schedule]
every = "month"
day = 1
hour = 4

[observability.logging]
level = "info"
format = "compact"
"#
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Archive { dry_run }) => {
            run_archive_once(args.config.as_deref(), dry_run).await;
        }
        Some(Command::Prune { dry_run }) => {
            run_prune_once(args.config.as_deref(), dry_run).await;
        }
        Some(Command::Init { output, force }) => {
            run_init(output, force);
        }
        Some(Command::Schema { output }) => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                eprintln!("Rebuild with: cargo build --features json-schema");
                std::process::exit(1);
            }
        }
        Some(Command::Features) => {
            run_features();
        }
        Some(Command::Run) | None => {
            run_scheduler(args.config.as_deref()).await;
        }
    }
}

/// Load the config from an explicit path, `./chatvault.toml`, or defaults.
fn load_config(explicit_path: Option<&str>) -> ChatvaultConfig {
    let path = match explicit_path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                eprintln!("Error: Config file not found: {}", path.display());
                std::process::exit(1);
            }
            Some(path)
        }
        None => {
            let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
            cwd_config.exists().then_some(cwd_config)
        }
    };

    let Some(path) = path else {
        eprintln!(
            "No config file found, using in-memory defaults. Run 'chatvault init' to create one."
        );
        return ChatvaultConfig::default();
    };

    match ChatvaultConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_observability(config: &ChatvaultConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics, continuing without them");
    }
}

struct Jobs {
    archiver: Arc<Archiver>,
    pruner: Arc<Pruner>,
}

/// Connect every configured store and assemble both jobs.
async fn build_jobs(config: &ChatvaultConfig) -> Jobs {
    let records = match create_record_store(&config.records).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize record store");
            std::process::exit(1);
        }
    };
    let cold = match create_cold_store(&config.archive).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize cold store");
            std::process::exit(1);
        }
    };
    let leases = match create_lease_store(&config.leases) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize lease store");
            std::process::exit(1);
        }
    };

    tracing::info!(
        records = records.backend_name(),
        cold = cold.backend_name(),
        leases = leases.backend_name(),
        prefix = %config.archive.prefix,
        "Stores initialized"
    );

    Jobs {
        archiver: Arc::new(Archiver::new(
            records,
            cold.clone(),
            leases.clone(),
            config.archive.prefix.clone(),
            config.jobs.archiver.clone(),
        )),
        pruner: Arc::new(Pruner::new(
            cold,
            leases,
            config.archive.prefix.clone(),
            config.jobs.pruner.clone(),
        )),
    }
}

/// Host both workers until a shutdown signal arrives.
async fn run_scheduler(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);
    init_observability(&config);
    let jobs = build_jobs(&config).await;

    let archiver = tokio::spawn(start_archival_worker(jobs.archiver));
    let pruner = tokio::spawn(start_pruning_worker(jobs.pruner));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping workers");

    // A conversation's records are deleted only after its blobs are durable.
    archiver.abort();
    pruner.abort();
    let _ = archiver.await;
    let _ = pruner.await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run one archival pass and print its report.
async fn run_archive_once(explicit_config_path: Option<&str>, dry_run: bool) {
    let mut config = load_config(explicit_config_path);
    if dry_run {
        config.jobs.archiver.safety.dry_run = true;
    }
    init_observability(&config);
    let jobs = build_jobs(&config).await;

    let hot_retention = config.jobs.archiver.hot_retention;
    match jobs.archiver.run_archival(Utc::now(), hot_retention).await {
        Ok(report) => print_json(&report),
        Err(ArchiveError::AllConversationsFailed(report)) => {
            print_json(&report);
            eprintln!("Error: every conversation failed to archive");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run one pruning pass and print its report.
async fn run_prune_once(explicit_config_path: Option<&str>, dry_run: bool) {
    let mut config = load_config(explicit_config_path);
    if dry_run {
        config.jobs.pruner.safety.dry_run = true;
    }
    init_observability(&config);
    let jobs = build_jobs(&config).await;

    let cold_retention = config.jobs.pruner.cold_retention;
    match jobs.pruner.run_pruning(Utc::now(), cold_retention).await {
        Ok(report) => print_json(&report),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize report: {}", e);
            std::process::exit(1);
        }
    }
}

/// Create a starter configuration file.
fn run_init(output: Option<String>, force: bool) {
    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To start the scheduler, run:");
    println!("  chatvault run --config {}", output_path.display());
}

/// Export JSON schema for the configuration file to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match ChatvaultConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to serialize config schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

/// Print enabled compile-time features and build profile.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        (
            "database-sqlite",
            "Record stores",
            cfg!(feature = "database-sqlite"),
        ),
        ("s3-storage", "Cold stores", cfg!(feature = "s3-storage")),
        ("redis", "Lease stores", cfg!(feature = "redis")),
        ("prometheus", "Observability", cfg!(feature = "prometheus")),
        ("json-schema", "Tools", cfg!(feature = "json-schema")),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "standard") {
        "standard"
    } else if cfg!(feature = "minimal") {
        "minimal"
    } else {
        "custom"
    };

    println!("chatvault v{version}\n");
    println!("Build profile: {profile}");
    match profile {
        "full" | "standard" => {
            println!("  (standard = minimal + s3-storage, redis, prometheus, json-schema)\n")
        }
        "minimal" => println!("  (minimal = scheduler host + sqlite record store)\n"),
        _ => println!(),
    }

    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<32} {status}");
    }
}
