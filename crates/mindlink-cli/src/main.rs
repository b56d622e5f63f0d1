//! `mindlink` – operator entry point for the bridge.
//!
//! 1. Loads `~/.mindlink/config.toml` (or `--config PATH`), writing defaults
//!    on first run.
//! 2. Builds a simulated robot with two cubes and a face in view.
//! 3. Either drops the operator into the interactive shell, or with `--run`
//!    cycles autonomously, issuing any requests given on the command line.
//! 4. Intercepts **Ctrl-C** to stop cycling and exit cleanly.

mod config;
mod operator;
mod repl;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use mindlink_hal::{RobotAdapter, SimRobot};
use mindlink_middleware::{EventBus, Topic};
use mindlink_runtime::CycleCoordinator;
use mindlink_types::{BridgeError, Event, EventPayload, Pose};
use tokio::runtime::Runtime;

use crate::operator::OperatorEngine;

/// How long `--run` waits for in-flight actions after the last cycle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "mindlink", version, about = "Bridge a rule engine's working memory to a robot")]
struct Args {
    /// Cycle autonomously instead of opening the operator shell.
    #[arg(long)]
    run: bool,

    /// Stop after N cycles (with `--run`).
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,

    /// Config file to use instead of `~/.mindlink/config.toml`.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Requests to issue on the first cycle, e.g. "drive-forward distance=50 speed=30".
    #[arg(value_name = "REQUEST")]
    requests: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Installed before the runtime exists; the exporter does not need one.
    let _telemetry = mindlink_runtime::init_tracing("mindlink");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current cycle …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let cfg = load_config(args.config.clone());

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let bus = EventBus::default();
    let robot: Arc<dyn RobotAdapter> = Arc::new(demo_robot(&cfg));
    let bridge = cfg.bridge();
    let mut coordinator = {
        let _entered = rt.enter();
        CycleCoordinator::new(OperatorEngine::new(), robot, bus.clone(), &bridge)
    };

    for line in &args.requests {
        match operator::parse_line(line) {
            Ok(op) => {
                if !coordinator.engine_mut().push(op) {
                    println!("  {} unknown command in '{}'", "⚠".yellow(), line);
                }
            }
            Err(e) => {
                println!("{}: {} ({})", "Bad request".red(), line, e);
                return ExitCode::FAILURE;
            }
        }
    }

    let result = if args.run {
        spawn_observer(&rt, &bus);
        rt.block_on(async {
            let ran = coordinator
                .run(bridge.cycle_period, args.cycles, shutdown.clone())
                .await?;
            coordinator.settle(SETTLE_TIMEOUT).await?;
            println!("  {} {} cycle(s)", "✓ Ran".green(), ran);
            Ok::<(), BridgeError>(())
        })
    } else {
        println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
        repl::run(&rt, &mut coordinator, bridge.cycle_period, shutdown)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Bridge stopped".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup
// ─────────────────────────────────────────────────────────────────────────────

fn load_config(path: Option<PathBuf>) -> config::Config {
    let path = path.unwrap_or_else(config::config_path);
    match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let defaults = config::Config::default();
            match config::save_to(&defaults, &path) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            let mut cfg = defaults;
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn demo_robot(cfg: &config::Config) -> SimRobot {
    SimRobot::new(cfg.robot_id.clone())
        .with_time_scale(cfg.sim_time_scale)
        .with_cube(1, Pose::new(0.0, 250.0, 0.0, 0.0))
        .with_cube(2, Pose::new(90.0, 180.0, 150.0, 0.0))
        .with_face(Some(1), "alex", Pose::new(180.0, 500.0, -80.0, 300.0))
}

/// Print lifecycle transitions and alerts as they are published.
fn spawn_observer(rt: &Runtime, bus: &EventBus) {
    let mut lifecycle = bus.subscribe(Topic::ActionLifecycle);
    let mut alerts = bus.subscribe(Topic::SystemAlerts);
    rt.spawn(async move {
        loop {
            let event = tokio::select! {
                e = lifecycle.recv() => e,
                e = alerts.recv() => e,
            };
            match event {
                Some(event) => print_event(&event),
                None => break,
            }
        }
    });
}

fn print_event(event: &Event) {
    match &event.payload {
        EventPayload::ActionStatus { request, command, status, failure } => match failure {
            Some(f) => println!("  #{request} {command} {}: {} ({})", status.as_str().red(), f.code, f.reason),
            None => println!("  #{request} {command} {}", status.as_str().green()),
        },
        EventPayload::SensorDegraded(reason) => {
            println!("  {} sensors degraded: {}", "⚠".yellow(), reason)
        }
        EventPayload::IdentityAnomaly { marker, details } => {
            println!("  {} {}: {}", "⚠".yellow(), marker, details)
        }
        EventPayload::Telemetry(_) => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ┌┬┐┬┌┐┌┌┬┐┬  ┬┌┐┌┬┌─".bold().cyan());
    println!("{}", "  │││││││ │││  ││││├┴┐".bold().cyan());
    println!("{}", "  ┴ ┴┴┘└┘─┴┘┴─┘┴┘└┘┴ ┴".bold().cyan());
    println!();
    println!("  {} {}",
        "mindlink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Working-memory bridge for embodied rule engines");
    println!();
}
