//! vaultgraph CLI - provision and bootstrap a Vault topology

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use vaultgraph::config::{RunSettings, TopologyConfig};
use vaultgraph::error::{FixSuggestion, GraphError, Result};
use vaultgraph::event_log::{EventKind, EventLog};
use vaultgraph::provider::create_provider;
use vaultgraph::provision::Provisioner;
use vaultgraph::topology::{Deployment, BOOTSTRAP_STEP};
use vaultgraph::InitClient;

#[derive(Parser)]
#[command(name = "vaultgraph")]
#[command(about = "vaultgraph - provision and bootstrap a Vault deployment as a deferred graph")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the topology, initialize Vault and print the exports
    Up {
        /// Topology file (defaults to ~/.config/vaultgraph/topology.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Provider backend (simulated, mock)
        #[arg(short, long, default_value = "simulated")]
        provider: String,

        /// Report this URI for the vault service instead of a synthetic one
        #[arg(long)]
        vault_endpoint: Option<String>,

        /// Seconds to wait for exports before failing the stragglers
        #[arg(long)]
        deadline_secs: Option<u64>,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,

        /// Print root token and recovery keys unmasked
        #[arg(long)]
        show_secrets: bool,

        /// Write the run's event log as JSON
        #[arg(long)]
        events_out: Option<PathBuf>,
    },

    /// Print resources in dependency order without provisioning
    Plan {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Validate a topology file
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default topology file
    InitConfig {
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Up {
            config,
            provider,
            vault_endpoint,
            deadline_secs,
            format,
            show_secrets,
            events_out,
        } => {
            up(UpArgs {
                config,
                provider,
                vault_endpoint,
                deadline_secs,
                format,
                show_secrets,
                events_out,
            })
            .await
        }
        Commands::Plan { config, format } => plan(config.as_deref(), format),
        Commands::Validate { config } => validate(config.as_deref()),
        Commands::InitConfig { path, force } => init_config(path, force),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

struct UpArgs {
    config: Option<PathBuf>,
    provider: String,
    vault_endpoint: Option<String>,
    deadline_secs: Option<u64>,
    format: Format,
    show_secrets: bool,
    events_out: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<TopologyConfig> {
    let config = match path {
        Some(path) => TopologyConfig::load_from(path)?,
        None => TopologyConfig::load()?,
    };
    Ok(config.with_env())
}

async fn up(args: UpArgs) -> Result<bool> {
    let config = load_config(args.config.as_deref())?;
    let mut settings = RunSettings::default();
    if let Some(secs) = args.deadline_secs {
        settings = settings.with_deadline(Duration::from_secs(secs));
    }

    let endpoints: Vec<(&str, &str)> = args
        .vault_endpoint
        .as_deref()
        .map(|uri| vec![("vault", uri)])
        .unwrap_or_default();
    let provider = create_provider(&args.provider, &endpoints)
        .map_err(|e| GraphError::Provider(format!("{:#}", e)))?;

    if matches!(args.format, Format::Text) {
        eprintln!(
            "{} Provisioning {} in {} with provider {}",
            "→".cyan(),
            config.project.cyan().bold(),
            config.region.cyan(),
            provider.name().cyan()
        );
    }

    let events = EventLog::new();
    let provisioner = Provisioner::new(provider, events.clone());
    let client = InitClient::new(&settings)?;
    let deployment = Deployment::compose(&config, provisioner, client)?;
    let report = deployment.finalize(settings.finalize_deadline).await;

    if let Some(path) = &args.events_out {
        events.write_to(path)?;
    }

    match args.format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&report.to_json(args.show_secrets))?);
        }
        Format::Text => {
            println!("{} bootstrap: {}", "→".cyan(), report.bootstrap);
            print!("{}", report.exports.render_text(args.show_secrets));
            let duration_ms = events.run_events().into_iter().find_map(|e| match e.kind {
                EventKind::RunFinalized {
                    total_duration_ms, ..
                } => Some(total_duration_ms),
                _ => None,
            });
            if let Some(ms) = duration_ms {
                println!("{} run {} finished in {}ms", "→".cyan(), report.run_id, ms);
            }
        }
    }

    Ok(report.is_success())
}

fn plan(config: Option<&Path>, format: Format) -> Result<bool> {
    let config = load_config(config)?;
    let events = EventLog::new();
    let provisioner = Provisioner::planning(events);

    // The handshake never fires: the service URI stays pending while planning
    let client = InitClient::new(&RunSettings::default())?;
    let deployment = Deployment::compose(&config, provisioner, client)?;
    let provisioner = deployment.provisioner();
    let entries = provisioner.plan()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => {
            for (i, entry) in entries.iter().enumerate() {
                let deps = if entry.dependencies.is_empty() {
                    String::new()
                } else {
                    format!(" ← {}", entry.dependencies.join(", "))
                };
                let after_init = entry.name != BOOTSTRAP_STEP
                    && provisioner.with_graph(|g| g.has_path(BOOTSTRAP_STEP, &entry.name));
                let marker = if after_init { " [after init]" } else { "" };
                println!(
                    "{:>3}. {} {}{}{}",
                    i + 1,
                    entry.name.bold(),
                    format!("({})", entry.kind).dimmed(),
                    deps.dimmed(),
                    marker.yellow()
                );
            }
            println!("{} {} resources", "✓".green(), entries.len());
        }
    }
    Ok(true)
}

fn validate(config: Option<&Path>) -> Result<bool> {
    let shown = config
        .map(Path::to_path_buf)
        .unwrap_or_else(TopologyConfig::config_path);
    let config = load_config(config)?;
    config.validate()?;

    println!("{} Topology '{}' is valid", "✓".green(), shown.display());
    println!("  Project: {}", config.project);
    println!("  Region: {}", config.region);
    println!("  DNS zone: {}", config.dns_zone);
    println!(
        "  Auto-unseal: {}",
        if config.vault.auto_unseal { "yes" } else { "no" }
    );
    if let Some(secret) = config.masked_oidc_secret() {
        println!("  OIDC client secret: {}", secret);
    }
    println!("  KV mounts: {}", config.vault.kv_mounts.len());
    println!(
        "  Git host: {}",
        if config.git.is_some() { "yes" } else { "no" }
    );
    Ok(true)
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<bool> {
    let path = path.unwrap_or_else(TopologyConfig::config_path);
    if path.exists() && !force {
        return Err(GraphError::ConfigError {
            reason: format!("{} already exists (use --force to overwrite)", path.display()),
        });
    }
    TopologyConfig::default().save_to(&path)?;
    println!("{} Wrote {}", "✓".green(), path.display());
    Ok(true)
}
