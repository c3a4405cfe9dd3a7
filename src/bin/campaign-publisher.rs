//! Campaign Publisher CLI
//!
//! Publishes one piece of content to many destinations

use anyhow::{Context, Result};
use campaign_publisher::core::config::DispatcherConfig;
use campaign_publisher::core::config_loader::CONFIG_FILENAME;
use campaign_publisher::orchestration::{CampaignSummary, DispatcherOptions, JsonFileSink};
use campaign_publisher::plugins::{CapabilityRegistry, DryRunCapability};
use campaign_publisher::validation::SubmissionValidator;
use campaign_publisher::{
    CampaignRequest, ConfigLoadOptions, ConfigLoader, CredentialManager, OrchestratorConfig,
    QueueDispatcher, Severity,
};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Multi-destination content publishing orchestrator
#[derive(Parser)]
#[command(name = "campaign-publisher")]
#[command(version = "0.1.0")]
#[command(about = "Multi-destination content publishing orchestrator", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./.campaign-config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit process logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a campaign and wait for it to complete
    Submit {
        /// Campaign request file (YAML or JSON)
        #[arg(value_name = "CAMPAIGN_FILE")]
        campaign_file: PathBuf,

        /// Maximum jobs executing at once
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Per-job timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Attempts per destination, including the first
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Resolve every destination to the dry-run capability
        #[arg(long)]
        dry_run: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a campaign and show how each destination resolves
    Check {
        /// Campaign request file (YAML or JSON)
        #[arg(value_name = "CAMPAIGN_FILE")]
        campaign_file: PathBuf,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Submit {
            campaign_file,
            max_concurrency,
            timeout_secs,
            max_attempts,
            dry_run,
            json,
        } => {
            let overrides = OrchestratorConfig {
                dispatcher: Some(DispatcherConfig {
                    max_concurrency,
                    job_timeout_secs: timeout_secs,
                    retry: None,
                }),
                ..Default::default()
            };
            let mut config = load_config(cli.config, Some(overrides)).await?;
            if let Some(attempts) = max_attempts {
                config
                    .dispatcher
                    .get_or_insert_with(Default::default)
                    .retry
                    .get_or_insert_with(Default::default)
                    .max_attempts = attempts;
            }
            submit_command(&campaign_file, config, dry_run, json).await
        }
        Commands::Check { campaign_file } => {
            let config = load_config(cli.config, None).await?;
            check_command(&campaign_file, config).await
        }
        Commands::Init { force } => init_command(force).await,
    }
}

async fn load_config(
    config_file: Option<PathBuf>,
    cli_overrides: Option<OrchestratorConfig>,
) -> Result<OrchestratorConfig> {
    let mut options = ConfigLoadOptions::for_project(".");
    options.config_file = config_file;
    options.cli_overrides = cli_overrides;

    let config = ConfigLoader::load(options).await?;
    let validation = ConfigLoader::validate(&config);
    if !validation.valid || !validation.warnings.is_empty() {
        eprintln!("{}", ConfigLoader::format_validation_result(&validation));
    }
    if !validation.valid {
        anyhow::bail!("invalid configuration");
    }
    Ok(config)
}

async fn read_request(path: &Path) -> Result<CampaignRequest> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;

    let request = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    Ok(request)
}

/// Registry mapping every category of the request to the dry-run capability
fn dry_run_registry(request: &CampaignRequest) -> CapabilityRegistry {
    let capability = Arc::new(DryRunCapability::new());
    let categories: BTreeSet<_> = request
        .destinations
        .iter()
        .map(|d| d.category.as_str())
        .collect();

    categories
        .into_iter()
        .fold(CapabilityRegistry::builder(), |builder, category| {
            builder.category(category, capability.clone())
        })
        .build()
}

async fn submit_command(
    campaign_file: &Path,
    config: OrchestratorConfig,
    dry_run: bool,
    json: bool,
) -> Result<i32> {
    let mut request = read_request(campaign_file).await?;
    let campaign_id = request
        .campaign_id
        .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
        .clone();

    println!("\n📣 campaign-publisher{}\n", if dry_run { " (dry run)" } else { "" });

    let registry = if dry_run {
        dry_run_registry(&request)
    } else {
        CapabilityRegistry::from_config(&config)?
    };

    let mut builder = QueueDispatcher::builder(Arc::new(registry))
        .options(DispatcherOptions::from(&config))
        .relay(Arc::new(campaign_publisher::LogRelay::new(config.relay_capacity())))
        .credentials(CredentialManager::new(config.env_fallback()));
    if let Some(dir) = config.log_dir() {
        builder = builder.sink(Arc::new(JsonFileSink::new(dir)));
    }
    let dispatcher = builder.build();

    let mut events = dispatcher.subscribe(&campaign_id);
    let receipt = match dispatcher.submit(request).await {
        Ok(receipt) => receipt,
        Err(e) => {
            eprintln!("❌ {}", e);
            for action in e.suggested_actions() {
                eprintln!("  - {}", action);
            }
            return Ok(1);
        }
    };

    println!(
        "Campaign {} accepted: {} jobs, {} skipped\n",
        receipt.campaign_id,
        receipt.job_count,
        receipt.skipped.len()
    );
    for skipped in &receipt.skipped {
        println!(
            "  ⏭️  {} ({})",
            skipped.destination_key,
            skipped.reason.as_str()
        );
    }

    while let Some(event) = events.recv().await {
        let icon = match event.severity {
            Severity::Info => "•",
            Severity::Success => "✅",
            Severity::Warning => "⚠️ ",
            Severity::Error => "❌",
        };
        match &event.destination {
            Some(destination) => println!("{} [{}] {}", icon, destination, event.message),
            None => println!("{} {}", icon, event.message),
        }
    }

    let state = dispatcher.wait_for_completion(&receipt.campaign_id).await?;
    let summary = CampaignSummary::from_state(&state);

    if json {
        println!("{}", summary.to_json()?);
    } else {
        println!("\n{}", summary.to_markdown());
    }

    Ok(if summary.all_succeeded() { 0 } else { 1 })
}

async fn check_command(campaign_file: &Path, config: OrchestratorConfig) -> Result<i32> {
    println!("\n🔍 Campaign Check\n");

    let request = read_request(campaign_file).await?;
    let result = SubmissionValidator::new().validate(&request);

    if result.is_valid {
        println!("  ✅ Submission is valid");
    } else {
        println!("  ❌ Submission is invalid");
        for error in &result.errors {
            println!("    - [{}] {}", error.field, error.message);
        }
    }
    if !result.warnings.is_empty() {
        println!("  ⚠️  Warnings:");
        for warning in &result.warnings {
            println!("    - [{}] {}", warning.field, warning.message);
        }
    }

    let registry = CapabilityRegistry::from_config(&config)?;
    let credentials = CredentialManager::new(config.env_fallback());

    println!("\nDestinations:");
    for destination in SubmissionValidator::dedupe(&request.destinations) {
        let key = destination.key();
        if let Some(category) = &request.category
            && &destination.category != category
        {
            println!("  ⏭️  {} -> skipped (category_mismatch)", key);
            continue;
        }
        if !destination.verified {
            println!("  ⏭️  {} -> skipped (unverified)", key);
            continue;
        }

        match registry.resolve(&destination) {
            Ok(handle) => {
                let bundle = credentials.resolve(&destination);
                let missing = credentials.missing(&bundle, &handle.required_credentials());
                if missing.is_empty() {
                    println!("  ✅ {} -> {} ({:?})", key, handle.name(), handle.matched());
                } else {
                    println!(
                        "  ⏭️  {} -> skipped (missing_credentials: {})",
                        key,
                        missing.join(", ")
                    );
                }
            }
            Err(e) => println!("  ❌ {} -> {}", key, e),
        }
    }

    println!();
    Ok(if result.is_valid { 0 } else { 1 })
}

const DEFAULT_CONFIG: &str = r#"version: "1.0"

dispatcher:
  maxConcurrency: 4
  jobTimeoutSecs: 120
  retry:
    maxAttempts: 2
    initialDelayMs: 1000
    maxDelayMs: 30000
    backoffMultiplier: 2.0
    retryOnTimeout: true

capabilities:
  blog-webhook:
    type: webhook
    headers:
      X-Campaign-Source: campaign-publisher
  preview:
    type: dry-run

registry:
  domains: {}
  categories:
    blog: blog-webhook
    forum: preview

credentials:
  envFallback:
    blog: CAMPAIGN_BLOG_TOKEN

output:
  logDir: .campaign-logs
"#;

async fn init_command(force: bool) -> Result<i32> {
    println!("\n🎯 Initialize campaign-publisher\n");

    let path = PathBuf::from(CONFIG_FILENAME);
    if path.exists() && !force {
        eprintln!("⚠️  {} already exists (use --force to overwrite)", CONFIG_FILENAME);
        return Ok(1);
    }

    tokio::fs::write(&path, DEFAULT_CONFIG).await?;
    println!("✅ Wrote {}", path.display());
    Ok(0)
}
