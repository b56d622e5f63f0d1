//! REPL – the interactive operator shell.
//!
//! Lines starting with `/` drive and inspect the bridge; anything else is an
//! action request for the output link:
//!
//!   drive-forward distance=50 speed=30
//!   /step [n]      – run n decision cycles (default 1)
//!   /run n         – run n cycles at the configured cycle period
//!   /input         – print the input link
//!   /output        – print the output link with status markers
//!   /retract <id>  – remove a request by fact id
//!   /clear         – remove every request
//!   /help          – show this list
//!   /quit | /exit  – leave the shell

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mindlink_memory::FactId;
use mindlink_runtime::{CycleCoordinator, CycleReport};
use mindlink_types::{ActionStatus, BridgeError};
use tokio::runtime::Runtime;

use crate::operator::{self, Op, OperatorEngine};

const RENDER_DEPTH: usize = 4;

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Step(u64),
    Run(u64),
    Input,
    Output,
    Retract(FactId),
    Clear,
    Help,
    Quit,
    Request(Op),
}

/// Parse one non-empty shell line.
pub fn parse_command(line: &str) -> Result<ShellCommand, String> {
    let line = line.trim();
    if !line.starts_with('/') {
        return operator::parse_line(line).map(ShellCommand::Request);
    }
    let mut words = line.split_whitespace();
    let cmd = words.next().unwrap_or_default();
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments for {cmd}"));
    }
    match (cmd, arg) {
        ("/step", None) => Ok(ShellCommand::Step(1)),
        ("/step", Some(n)) => parse_count(n).map(ShellCommand::Step),
        ("/run", Some(n)) => parse_count(n).map(ShellCommand::Run),
        ("/run", None) => Err("usage: /run <cycles>".to_string()),
        ("/retract", Some(id)) => id
            .trim_start_matches('#')
            .parse::<u64>()
            .map(|raw| ShellCommand::Retract(FactId::new(raw)))
            .map_err(|_| format!("'{id}' is not a fact id")),
        ("/retract", None) => Err("usage: /retract <fact-id>".to_string()),
        ("/input", None) => Ok(ShellCommand::Input),
        ("/output", None) => Ok(ShellCommand::Output),
        ("/clear", None) => Ok(ShellCommand::Clear),
        ("/help", None) => Ok(ShellCommand::Help),
        ("/quit" | "/exit", None) => Ok(ShellCommand::Quit),
        (other, _) => Err(format!("unknown command '{other}'")),
    }
}

fn parse_count(raw: &str) -> Result<u64, String> {
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("'{raw}' is not a positive cycle count")),
    }
}

/// Entry point for the interactive shell.
///
/// `shutdown` is polled between lines and between cycles.
///
/// # Errors
///
/// Returns the fatal error that stopped the bridge.
pub fn run(
    rt: &Runtime,
    coordinator: &mut CycleCoordinator<OperatorEngine>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "mindlink>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(msg) => {
                println!("{} {}. Type {} for help.", "✗".red(), msg, "/help".bold());
                continue;
            }
        };

        match command {
            ShellCommand::Step(n) => run_cycles(rt, coordinator, n, None, &shutdown)?,
            ShellCommand::Run(n) => run_cycles(rt, coordinator, n, Some(period), &shutdown)?,
            ShellCommand::Input => {
                let wm = coordinator.memory();
                print!("{}", wm.render(wm.input_link(), RENDER_DEPTH));
            }
            ShellCommand::Output => {
                let wm = coordinator.memory();
                print!("{}", wm.render(wm.output_link(), RENDER_DEPTH));
            }
            ShellCommand::Retract(fact) => {
                coordinator.engine_mut().push(Op::Retract(fact));
                println!("  {} retraction of {} on the next cycle", "queued".dimmed(), fact);
            }
            ShellCommand::Clear => {
                coordinator.engine_mut().push(Op::Clear);
                println!("  {} clear on the next cycle", "queued".dimmed());
            }
            ShellCommand::Request(op) => {
                let known = coordinator.engine_mut().push(op);
                if known {
                    println!("  {} for the next cycle", "queued".dimmed());
                } else {
                    println!(
                        "  {} the bridge does not know this command and will ignore it",
                        "⚠".yellow()
                    );
                }
            }
            ShellCommand::Help => print_help(),
            ShellCommand::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
    Ok(())
}

fn run_cycles(
    rt: &Runtime,
    coordinator: &mut CycleCoordinator<OperatorEngine>,
    n: u64,
    period: Option<Duration>,
    shutdown: &AtomicBool,
) -> Result<(), BridgeError> {
    rt.block_on(async {
        for i in 0..n {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if i > 0
                && let Some(period) = period
            {
                tokio::time::sleep(period).await;
            }
            let report = match coordinator.run_cycle().await {
                Ok(report) => report,
                Err(e) => {
                    println!("{} {}", "✗ bridge stopped:".red().bold(), e);
                    return Err(e);
                }
            };
            print_report(&report, &coordinator.engine_mut().take_issued());
        }
        println!("  {} action(s) in flight", coordinator.in_flight());
        Ok(())
    })
}

fn print_report(report: &CycleReport, issued: &[(FactId, String)]) {
    let input = &report.input;
    println!(
        "{} {}  objects +{} ~{} ={}  percepts {}{}",
        "cycle".dimmed(),
        report.cycle.to_string().bold(),
        input.created,
        input.updated,
        input.unchanged,
        input.ephemeral,
        if report.degraded { "  (sensors degraded)".yellow().to_string() } else { String::new() },
    );
    for (fact, name) in issued {
        println!("  {} {} {}", "→".cyan(), fact.to_string().bold(), name);
    }
    for t in &report.transitions {
        let status = match t.status {
            ActionStatus::Running => t.status.as_str().yellow(),
            ActionStatus::Complete => t.status.as_str().green(),
            ActionStatus::Failed => t.status.as_str().red(),
        };
        match &t.failure {
            Some(failure) => println!(
                "  {} {} {}: {} ({})",
                t.request.to_string().bold(),
                t.command,
                status,
                failure.code,
                failure.reason.dimmed()
            ),
            None => println!("  {} {} {}", t.request.to_string().bold(), t.command, status),
        }
    }
}

fn print_help() {
    println!();
    println!("{}", "Operator Shell".bold().underline());
    println!("  {}  – queue an action request", "<command> key=value …".bold().cyan());
    println!("  {}             – run n decision cycles (default 1)", "/step [n]".bold().cyan());
    println!("  {}               – run n cycles at the cycle period", "/run n".bold().cyan());
    println!("  {}               – show the input link", "/input".bold().cyan());
    println!("  {}              – show requests and status markers", "/output".bold().cyan());
    println!("  {}        – withdraw a request", "/retract <id>".bold().cyan());
    println!("  {}               – withdraw every request", "/clear".bold().cyan());
    println!("  {}        – exit", "/quit  /exit".bold().cyan());
    println!();
    println!("  e.g. {}", "drive-forward distance=50 speed=30".dimmed());
    println!("       {}", "pick-up-object object-id=1".dimmed());
    println!("       {}", r#"say-text text="hello there""#.dimmed());
    println!();
}
