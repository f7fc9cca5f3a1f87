//! Command-line interface for cinchseal.
//!
//! Provides commands for running the wipe sequence, validating and showing
//! plans, and inspecting the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::adapters::SimulatedController;
use crate::config::{self, ResolvedConfig};
use crate::core::{Cell, Fault};
use crate::domain::{Motion, SafeMove, SequencePlan};

/// cinchseal - Interlocked pin-wiping sequence for an xArm cell
#[derive(Parser, Debug)]
#[command(name = "cinchseal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sequence
    Run {
        /// Plan file (defaults to the configured plan)
        #[arg(short, long)]
        plan: Option<PathBuf>,

        /// Stop after this many completed passes
        #[arg(short = 'n', long)]
        passes: Option<u64>,

        /// Drive the in-process simulated controller
        #[arg(long)]
        simulate: bool,
    },

    /// Load and validate a plan
    Validate {
        /// Plan file (defaults to the configured plan)
        #[arg(short, long)]
        plan: Option<PathBuf>,
    },

    /// Print the steps of a plan
    Show {
        /// Plan file (defaults to the configured plan)
        #[arg(short, long)]
        plan: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                plan,
                passes,
                simulate,
            } => run_sequence(plan, passes, simulate).await,
            Commands::Validate { plan } => validate_plan(plan),
            Commands::Show { plan, json } => show_plan(plan, json),
            Commands::Config => show_config(),
        }
    }
}

/// Plan path from the flag, or the configured one
fn plan_path(cfg: &ResolvedConfig, plan: Option<PathBuf>) -> PathBuf {
    plan.unwrap_or_else(|| cfg.plan.clone())
}

fn load_plan(path: &Path) -> Result<SequencePlan> {
    if !path.exists() {
        anyhow::bail!("Plan file not found: {}", path.display());
    }
    SequencePlan::from_file(path)
}

/// Run the sequence until a fault, Ctrl-C, or the pass limit
async fn run_sequence(plan: Option<PathBuf>, passes: Option<u64>, simulate: bool) -> Result<()> {
    let cfg = config::config()?;
    let path = plan_path(cfg, plan);
    let plan = load_plan(&path)?;

    if !simulate {
        anyhow::bail!(
            "No transport for controller at {}; use --simulate for a dry run",
            cfg.controller_address
        );
    }

    // Start and readiness held asserted so the dry run never waits
    let controller = Arc::new(SimulatedController::new());
    controller.set_input(cfg.lines.start, true);
    controller.set_input(cfg.lines.ready, true);

    let mut cell = Cell::start(controller.clone(), plan, cfg.lines, cfg.timing)
        .context("Failed to start cell")?;

    let monitor = cell.fault_monitor();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            monitor.shutdown();
        }
    });

    let session = cell.session_id();
    let summary = cell.run(passes).await;
    cell.shutdown().await;

    eprintln!(
        "\n[Session {}: {} passes, {} aborts, {} motions]",
        session,
        summary.passes_completed,
        summary.aborts,
        controller.motion_count()
    );

    match summary.fault {
        None | Some(Fault::Shutdown) => Ok(()),
        Some(fault) => {
            eprintln!("[Session {} faulted: {}]", session, fault);
            std::process::exit(1);
        }
    }
}

/// Validate a plan file
fn validate_plan(plan: Option<PathBuf>) -> Result<()> {
    let cfg = config::config()?;
    let path = plan_path(cfg, plan);

    match load_plan(&path) {
        Ok(plan) => {
            println!("Plan '{}' is valid", plan.name());
            println!("  Steps:       {}", plan.len());
            println!("  Fingerprint: {}", plan.fingerprint());
            Ok(())
        }
        Err(e) => {
            eprintln!("Plan {} is invalid: {:#}", path.display(), e);
            std::process::exit(1);
        }
    }
}

/// Print a plan's steps
fn show_plan(plan: Option<PathBuf>, json: bool) -> Result<()> {
    let cfg = config::config()?;
    let plan = load_plan(&plan_path(cfg, plan))?;

    if json {
        let out = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
        println!("{}", out);
        return Ok(());
    }

    println!("Plan: {}", plan.name());
    if !plan.description().is_empty() {
        println!("  {}", plan.description());
    }
    println!("Fingerprint: {}", plan.fingerprint());
    println!(
        "Home: {} @ {}/{}",
        plan.home(),
        plan.home_speed(),
        plan.home_accel()
    );
    match plan.safe_move() {
        SafeMove::Joints {
            angles,
            speed,
            accel,
        } => println!("Safe move: joints {} @ {}/{}", angles, speed, accel),
        SafeMove::Path {
            poses,
            speed,
            accel,
        } => println!("Safe move: path of {} waypoints @ {}/{}", poses.len(), speed, accel),
    }
    println!();

    println!("{:<14} {:<12} {:>7} {:>7} {:>6}  TARGET", "STEP", "TYPE", "SPEED", "ACCEL", "DWELL");
    println!("{}", "-".repeat(78));
    for (i, step) in plan.steps().iter().enumerate() {
        let (kind, target) = match &step.motion {
            Motion::MoveTo { pose } => ("move_to", pose.to_string()),
            Motion::ArcThrough { via, to, percent } => {
                ("arc_through", format!("{} -> {} ({}%)", via, to, percent))
            }
        };
        let kind = if step.wait {
            kind.to_string()
        } else {
            format!("{}*", kind)
        };
        println!(
            "{:<14} {:<12} {:>7} {:>7} {:>6}  {}",
            step.describe(i),
            kind,
            step.speed,
            step.accel,
            step.dwell_ms,
            target
        );
    }
    println!();
    println!("* non-blocking move");

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    let source = match &cfg.config_file {
        Some(path) => path.display().to_string(),
        None => "(none - using defaults)".to_string(),
    };
    println!("Config file: {}", source);
    println!();
    println!("Controller: {}", cfg.controller_address);
    println!("Plan:       {}", cfg.plan.display());
    println!();
    println!("Lines:");
    for line in cfg.lines.lines() {
        println!("  {:<10} {}", line.role.to_string(), line.number);
    }
    println!();
    println!("Timing:");
    println!("  Interlock poll:   {}ms", cfg.timing.interlock_poll.as_millis());
    println!("  Gate poll:        {}ms", cfg.timing.gate_poll.as_millis());
    println!("  Heartbeat period: {}ms", cfg.timing.heartbeat_period.as_millis());
    println!("  Settle:           {}ms", cfg.timing.settle.as_millis());
    println!("  Edge queue:       {}", cfg.timing.edge_queue_capacity);

    Ok(())
}
