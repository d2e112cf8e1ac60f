/*!
 * Bulwark CLI - error budget and SLO inspection
 */

use anyhow::Context;
use bulwark::{
    config::BulwarkConfig,
    error::{BulwarkError, EXIT_CRITICAL, EXIT_FAILURE, EXIT_SUCCESS},
    logging,
    output::{self, OutputMode},
    snapshot,
};
use bulwark_core_sli::{
    parse_window, AlertEvaluator, AlertSeverity, ErrorBudgetCalculator, MetricsSource, SloValidator,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(version, about = "Error budgets, burn-rate alerts and SLO compliance for guarded dependencies", long_about = None)]
struct Cli {
    /// Configuration file (default: config/bulwark.toml, then SLO_* environment variables)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured service name
    #[arg(long, global = true)]
    service: Option<String>,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration, then print a summary
    CheckConfig,

    /// Compute the error budget from a metrics snapshot
    Budget {
        /// JSON metrics snapshot
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,

        /// Window such as 1h or 30d (default: the configured budget window)
        #[arg(long, value_parser = parse_window)]
        window: Option<Duration>,
    },

    /// Evaluate burn-rate alerts; exits with 2 when a critical alert fires
    Alerts {
        /// JSON metrics snapshot
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,
    },

    /// Check every SLI against its target
    Compliance {
        /// JSON metrics snapshot
        #[arg(long, value_name = "FILE")]
        snapshot: PathBuf,

        /// Window such as 1h or 30d (default: the configured budget window)
        #[arg(long, value_parser = parse_window)]
        window: Option<Duration>,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<BulwarkError>()
                .map_or(EXIT_FAILURE, BulwarkError::exit_code)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let (mut config, origin) = BulwarkConfig::load(cli.config.as_deref())
        .map_err(BulwarkError::from)
        .context("Failed to load configuration")?;
    if let Some(service) = cli.service.clone() {
        config.service_name = service;
        config.validate().map_err(BulwarkError::from)?;
    }

    logging::init_logging(&config.logging, cli.verbose)?;
    debug!(origin = %origin, service = %config.service_name, "Configuration loaded");

    let mode = OutputMode::new(cli.json);

    match cli.command {
        Commands::CheckConfig => {
            let text = mode.render(&config, |c| output::config_table(c, &origin))?;
            println!("{}", text);
            info!(dependencies = config.dependencies.len(), "Configuration is valid");
            Ok(EXIT_SUCCESS)
        }
        Commands::Budget { snapshot, window } => {
            let calculator = calculator(&config, &snapshot)?;
            let window = window.unwrap_or(calculator.config().error_budget_window);
            let budget = calculator.calculate_budget(window)?;
            println!("{}", mode.render(&budget, output::budget_table)?);
            Ok(EXIT_SUCCESS)
        }
        Commands::Alerts { snapshot } => {
            let evaluator = AlertEvaluator::new(calculator(&config, &snapshot)?);
            let alerts = evaluator.should_alert()?;

            if alerts.is_empty() && mode == OutputMode::Human {
                println!("No alerts firing");
            } else {
                println!("{}", mode.render(&alerts, |a| output::alerts_table(a))?);
            }

            let critical = alerts
                .iter()
                .any(|a| a.severity == AlertSeverity::Critical);
            Ok(if critical { EXIT_CRITICAL } else { EXIT_SUCCESS })
        }
        Commands::Compliance { snapshot, window } => {
            let calculator = calculator(&config, &snapshot)?;
            let window = window.unwrap_or(calculator.config().error_budget_window);
            let overall = SloValidator::new(calculator).overall(window)?;
            println!("{}", mode.render(&overall, output::compliance_table)?);
            if mode == OutputMode::Human {
                println!("{}", overall.recommended_action);
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

fn calculator(config: &BulwarkConfig, snapshot: &Path) -> anyhow::Result<ErrorBudgetCalculator> {
    let source: Arc<dyn MetricsSource> = Arc::new(snapshot::load_source(snapshot)?);
    let calculator = ErrorBudgetCalculator::new(source, Arc::new(config.slo_config()))
        .map_err(BulwarkError::from)?;
    Ok(calculator)
}
