//! `fieldos` – FieldOS robot runtime
//!
//! This binary is the entry point on the robot computer.  It:
//!
//! 1. Loads `~/.fieldos/config.toml` (or `FIELDOS_CONFIG`), writing the
//!    defaults on first run, and applies `FIELDOS_*` overrides.
//! 2. Assembles the configured profile; a fatal startup error exits with
//!    status 1.
//! 3. Runs the safety and status polls on a current-thread runtime and
//!    reports stop transitions and module faults.
//! 4. Intercepts **Ctrl-C** to stop every module and exit.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use fieldos_bus::{Topic, TopicReceiver};
use fieldos_runtime::{Robot, RuntimeConfig, init_tracing, scheduler};
use fieldos_types::{EventPayload, FieldError};
use tokio::sync::{broadcast, watch};
use tracing::{error, warn};

fn main() -> ExitCode {
    init_tracing("fieldos");
    print_banner();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => return fatal(&e),
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // Held by `main` as well: a dropped sender would end the loops.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let handler_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        let _ = handler_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the robot stops only on fatal errors");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "could not build the runtime");
            eprintln!("{}: {e}", "Runtime error".red());
            return ExitCode::FAILURE;
        }
    };

    let robot = match Robot::assemble(&config) {
        Ok(robot) => robot,
        Err(e) => return fatal(&e),
    };
    println!(
        "  Robot {} assembled ({})\n",
        robot.profile().bold(),
        if config.simulation { "simulation".yellow() } else { "hardware".green() }
    );

    runtime.block_on(async {
        let safety = robot.subscribe(Topic::Safety);
        let faults = robot.subscribe(Topic::Faults);
        let notices = report(safety, faults, shutdown_rx.clone());
        tokio::join!(scheduler::run(&robot, &config, shutdown_rx), notices);
    });

    println!("{}", "  ✓ All modules stopped.  Exiting FieldOS.".green());
    ExitCode::SUCCESS
}

fn load_config() -> Result<RuntimeConfig, FieldError> {
    let path = config::config_path();
    if !path.exists() {
        println!("  No configuration found; writing defaults.");
        config::save_to(&RuntimeConfig::default(), &path)?;
    }
    let config = config::load()?;
    println!(
        "  Config loaded from {}  (profile {})",
        path.display().to_string().bold(),
        config.profile.bold()
    );
    Ok(config)
}

fn fatal(err: &FieldError) -> ExitCode {
    error!(error = %err, fatal = err.is_fatal(), "startup failed");
    eprintln!("{}: {err}", "Startup failed".red().bold());
    ExitCode::FAILURE
}

/// Print stop transitions and module faults until shutdown.
async fn report(
    mut safety: TopicReceiver,
    mut faults: TopicReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            event = safety.recv() => match event {
                Ok(event) => match event.payload {
                    EventPayload::EstopTriggered { state, sources } => {
                        let active: Vec<&str> = sources
                            .iter()
                            .filter(|(_, on)| **on)
                            .map(|(source, _)| source.as_str())
                            .collect();
                        println!(
                            "  {} robot {state}, motion paused ({})",
                            "■".red().bold(),
                            active.join(", ")
                        );
                    }
                    EventPayload::EstopReleased => {
                        println!("  {} robot armed, motion may resume", "▶".green().bold());
                    }
                    _ => {}
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "safety notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            event = faults.recv() => match event {
                Ok(event) => {
                    if let EventPayload::ModuleFault { module, message } = event.payload {
                        println!("  {} {}: {message}", "!".yellow().bold(), module.bold());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "fault notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   _____ _      _     _  ___  ____  "#.bold().cyan());
    println!("{}", r#"  |  ___(_) ___| | __| |/ _ \/ ___| "#.bold().cyan());
    println!("{}", r#"  | |_  | |/ _ \ |/ _` | | | \___ \ "#.bold().cyan());
    println!("{}", r#"  |  _| | |  __/ | (_| | |_| |___) |"#.bold().cyan());
    println!("{}", r#"  |_|   |_|\___|_|\__,_|\___/|____/ "#.bold().cyan());
    println!();
    println!("  {}", "Field robot runtime".dimmed());
    println!();
}
