use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use divtoken::{
    config::TokenConfig,
    scenario::{self, ReplayReport, StepOutcome},
    token::DividendToken,
};

/// Replay operations against a pull-based dividend token.
#[derive(Parser)]
#[command(name = "divtoken")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON scenario of deposits, transfers and withdrawals
    Replay {
        /// Scenario file (JSON array of operations)
        scenario: PathBuf,

        /// Token config file
        #[arg(short, long, env = "DIVTOKEN_CONFIG")]
        config: Option<PathBuf>,

        /// Override the initial supply minted to the creator
        #[arg(long)]
        initial_supply: Option<u64>,

        /// Override the minimum accepted deposit
        #[arg(long)]
        minimum_deposit: Option<u64>,

        /// Override the creator account
        #[arg(long)]
        creator: Option<String>,

        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Write the default token config
    DefaultConfig {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            scenario,
            config,
            initial_supply,
            minimum_deposit,
            creator,
            json,
        } => {
            let mut cfg = match config {
                Some(path) => TokenConfig::load(&path)?,
                None => TokenConfig::default(),
            };
            if let Some(supply) = initial_supply {
                cfg.initial_supply = supply;
            }
            if let Some(minimum) = minimum_deposit {
                cfg.minimum_deposit = minimum;
            }
            if let Some(creator) = creator {
                cfg.creator = creator;
            }
            replay_cmd(&scenario, &cfg, json)
        }
        Commands::DefaultConfig { out } => {
            let rendered = TokenConfig::default().to_json()?;
            match out {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("write {}", path.display()))?;
                    info!(path = %path.display(), "default config written");
                }
                None => println!("{rendered}"),
            }
            Ok(())
        }
    }
}

fn replay_cmd(path: &Path, cfg: &TokenConfig, json: bool) -> Result<()> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let operations = scenario::parse_scenario(&raw)
        .with_context(|| format!("parse scenario {}", path.display()))?;
    info!(
        operations = operations.len(),
        initial_supply = cfg.initial_supply,
        "replaying scenario"
    );

    let mut token = DividendToken::new(cfg).context("create token")?;
    let report = scenario::replay(&mut token, &operations).context("replay aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report)?;
    }
    Ok(())
}

fn print_report(report: &ReplayReport) -> Result<()> {
    for (idx, step) in report.steps.iter().enumerate() {
        match step {
            StepOutcome::Ok => println!("#{idx:03} ok"),
            StepOutcome::Event { event } => {
                println!("#{idx:03} {}", serde_json::to_string(event)?)
            }
            StepOutcome::Failed { error } => println!("#{idx:03} failed: {error}"),
        }
    }
    println!();
    println!("{:<20} {:>20} {:>20} {:>20}", "account", "balance", "outstanding", "paid");
    for (account, outstanding) in &report.outstanding {
        let balance = report.balances.get(account).copied().unwrap_or(0);
        let paid = report.paid.get(account).copied().unwrap_or(0);
        println!("{account:<20} {balance:>20} {outstanding:>20} {paid:>20}");
    }
    println!();
    println!("total supply        {}", report.total_supply);
    println!("distributed         {}", report.total_dividends_distributed);
    println!("dividend per unit   {}", report.dividend_per_unit);
    println!(
        "rounding gap        {} (bound {})",
        report.conservation.rounding_gap, report.conservation.gap_bound
    );
    println!("state root          {}", report.state_root);
    Ok(())
}
