use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::{should_stop, Aggressiveness, ConvergenceState, EffortLevel, PageSize};
use printfix::config::PrintfixConfig;
use printfix::diagnosis::{Diagnosis, IssueType};
use printfix::planner::{PlanContext, Planner};
use printfix::tools::CATALOG;
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML settings file; PRINTFIX_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the rule-based fix plan for a diagnosis file
    Plan {
        diagnosis: PathBuf,
        #[arg(long, default_value = "moderate")]
        aggressiveness: Aggressiveness,
        /// Document format; defaults to the diagnosis file type
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        target_page_size: Option<PageSize>,
        /// Issue types whose source-format fixes already failed
        #[arg(long = "failed", value_name = "ISSUE_TYPE")]
        failed: Vec<IssueType>,
        #[arg(long, default_value_t = 1)]
        iteration: u32,
        #[arg(long, default_value = "standard")]
        effort: EffortLevel,
    },
    /// Evaluate the stop decision for a convergence history file
    Converge {
        history: PathBuf,
        #[arg(long)]
        max_iterations: u32,
        #[arg(long, default_value_t = false)]
        fallback_available: bool,
    },
    /// List the fix tool catalog
    Tools {
        /// Include each tool's parameter schema
        #[arg(long, default_value_t = false)]
        schema: bool,
    },
}

#[derive(Serialize)]
struct ConvergeReport {
    stop: bool,
    reason: Option<String>,
    success: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = PrintfixConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Plan {
            diagnosis,
            aggressiveness,
            format,
            target_page_size,
            failed,
            iteration,
            effort,
        } => {
            let diagnosis: Diagnosis = read_json(&diagnosis)?;
            let file_type = format.unwrap_or_else(|| diagnosis.file_type().to_string());
            let failed: BTreeSet<IssueType> = failed.into_iter().collect();
            let effort = config.effort.get(effort);

            let plan = Planner::rules_only().plan_rules(&PlanContext {
                job_id: diagnosis.job_id(),
                iteration,
                diagnosis: &diagnosis,
                aggressiveness,
                file_type: &file_type,
                target_page_size,
                history: &[],
                failed_issue_types: &failed,
                effort,
            });
            info!(
                job_id = diagnosis.job_id(),
                actions = plan.actions.len(),
                skipped = plan.skipped_issues.len(),
                "Plan built"
            );
            print_json(&plan)?;
        }
        Command::Converge {
            history,
            max_iterations,
            fallback_available,
        } => {
            let history: Vec<ConvergenceState> = read_json(&history)?;
            let decision = should_stop(&history, max_iterations, fallback_available);
            print_json(&ConvergeReport {
                stop: decision.is_some(),
                success: decision.as_ref().is_some_and(|r| r.is_success()),
                reason: decision.map(|r| r.to_string()),
            })?;
        }
        Command::Tools { schema } => {
            for spec in CATALOG {
                let level = match spec.level {
                    printfix::tools::ToolLevel::Source => "source",
                    printfix::tools::ToolLevel::Pdf => "pdf",
                };
                println!("{:<22} {:<7} {}", spec.name, level, spec.description);
                if schema {
                    println!("{}", serde_json::to_string_pretty(&spec.parameters_schema())?);
                }
            }
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
