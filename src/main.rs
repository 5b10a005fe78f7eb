use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use opsguard::advisor::ConfidenceDecision;
use opsguard::config::Config;
use opsguard::logs::history::{self, LogQuery};

#[derive(Parser)]
#[command(
    name = "opsguard",
    about = "Automated incident response: sustained-spike detection, root-cause triage and confidence-gated service restarts",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults: $OPSGUARD_CONFIG, /etc/opsguard/opsguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop until Ctrl-C / SIGTERM
    Monitor,

    /// Run a single cycle and print its report
    ///
    /// With a non-zero sustain duration one cycle can only start tracking,
    /// never raise an incident.
    Check {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Parse advisor output and show the resulting decision
    ParseDecision {
        /// File containing the advisor text (stdin if omitted)
        file: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Search past incidents and alerts in the JSON log
    History {
        /// Only entries from the last N hours
        #[arg(long, default_value = "24")]
        hours: u64,

        /// Filter by alert type (incident, decision, remediation, escalation)
        #[arg(long)]
        alert_type: Option<String>,

        /// Filter by level (info, warn, error, ...)
        #[arg(long)]
        level: Option<String>,

        /// Case-insensitive substring of the message
        #[arg(long)]
        search: Option<String>,

        /// Maximum entries to show (0 = all)
        #[arg(long, default_value = "50")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Monitor => {
            opsguard::logging::init(&config.logging)?;
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting opsguard");
            opsguard::run(config).await?;
        }
        Commands::Check { json } => {
            opsguard::logging::init_console(&config.logging.level);
            let report = opsguard::run_once(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.status_line());
            }
        }
        Commands::ParseDecision { file, json } => {
            opsguard::logging::init_console("warn");
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("reading stdin")?;
                    buf
                }
            };
            let decision = ConfidenceDecision::parse(&raw);
            if json {
                let value = serde_json::json!({
                    "decision": decision,
                    "auto_remediate": decision.should_auto_remediate(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Confidence:     {}", decision.confidence);
                println!("Recommendation: {}", decision.recommendation);
                println!("Reason:         {}", decision.reason);
                println!(
                    "Auto-remediate: {}",
                    if decision.should_auto_remediate() { "yes" } else { "no" }
                );
                if !decision.narrative.is_empty() {
                    println!("\n{}", decision.narrative);
                }
            }
        }
        Commands::Config => {
            print!(
                "{}",
                toml::to_string_pretty(&config).context("serializing configuration")?
            );
        }
        Commands::History {
            hours,
            alert_type,
            level,
            search,
            limit,
            json,
        } => {
            opsguard::logging::init_console("warn");
            let path = config
                .logging
                .json_path
                .as_deref()
                .context("logging.json_path is not configured; there is no JSON log to search")?;
            let query = LogQuery {
                since: history::hours_before(Utc::now(), hours),
                until: None,
                level,
                alert_type,
                text: search,
                limit,
            };
            let entries = history::search(path, &query)
                .with_context(|| format!("searching {}", path.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No matching log entries.");
            } else {
                for e in &entries {
                    let ts = e
                        .timestamp
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} {:<5} [{}] {}",
                        ts,
                        e.level,
                        e.alert_type.as_deref().unwrap_or("-"),
                        e.message
                    );
                }
            }
        }
    }

    Ok(())
}
