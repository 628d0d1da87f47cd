//! # Pendulum Controller
//!
//! Bootstraps the controller node on a bounded executor:
//! load config → (pre) RT setup → create node → create executor → attach
//! → (post) RT setup → optional auto-start → dispatch until SIGINT/SIGTERM
//! → teardown.
//!
//! Exit codes: 0 clean shutdown, 2 recognized error, 255 (-1) unknown fault.

use std::panic;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use clap::Parser;
use pendulum_common::config::{ConfigLoader, LogLevel};
use pendulum_common::consts::DEFAULT_CONFIG_PATH;
use pendulum_common::data::JointCommand;
use pendulum_controller::config::{ControllerAppConfig, ProcessOverrides};
use pendulum_controller::controller::PendulumControllerNode;
use pendulum_controller::logging::init_logging;
use pendulum_controller::{BootstrapError, RealTimeConfigurator, bootstrap};
use tracing::{debug, error, info, trace};

/// Pendulum Controller: real-time bootstrap and lifecycle-managed control loop
#[derive(Parser, Debug)]
#[command(name = "pendulum_controller")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Real-time inverted-pendulum controller")]
struct Args {
    /// Path to the controller configuration TOML.
    /// Defaults to /etc/pendulum/controller.toml when present.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    process: ProcessOverrides,

    /// Stop after this many seconds (0 runs until signalled).
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    run_for: u64,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    // Panics are reported once, as the fatal error below.
    panic::set_hook(Box::new(|info| debug!("panic: {info}")));

    let code = match panic::catch_unwind(|| run(&args)) {
        Ok(code) => code,
        Err(payload) => {
            let e = BootstrapError::from_panic(payload);
            error!("FATAL: {e}");
            e.exit_code()
        }
    };
    process::exit(code);
}

fn run(args: &Args) -> i32 {
    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            match init_logging(LogLevel::Info, args.verbose, args.json) {
                Ok(()) => error!("FATAL: {e}"),
                Err(_) => eprintln!("FATAL: {e}"),
            }
            return e.exit_code();
        }
    };

    if let Err(e) = init_logging(config.shared.log_level, args.verbose, args.json) {
        let e = BootstrapError::from(e);
        eprintln!("FATAL: {e}");
        return e.exit_code();
    }

    info!(
        "Pendulum Controller v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let name = config.shared.service_name.clone();
    let settings = config.controller.clone();
    let node_name = name.clone();
    let run_for = args.run_for;

    let report = bootstrap(
        &name,
        config.process.clone(),
        RealTimeConfigurator::new(),
        config.executor.executor_config(),
        move || {
            PendulumControllerNode::new(node_name, settings, |cmd: JointCommand| {
                trace!(force = cmd.force, "joint command");
            })
        },
        |armed| {
            let stop = armed.stop_handle();
            ctrlc::set_handler(move || {
                info!("Received shutdown signal");
                stop.stop();
            })
            .map_err(|e| BootstrapError::Signal(e.to_string()))?;

            if run_for > 0 {
                let stop = armed.stop_handle();
                thread::Builder::new()
                    .name("run-timer".into())
                    .spawn(move || {
                        thread::sleep(Duration::from_secs(run_for));
                        info!(seconds = run_for, "run time elapsed");
                        stop.stop();
                    })
                    .map_err(|e| BootstrapError::Signal(e.to_string()))?;
            }
            Ok(())
        },
    );

    match report.error() {
        Some(e) => error!("FATAL: {e}"),
        None => info!("Pendulum Controller shutdown complete"),
    }
    report.exit_code()
}

fn load_config(args: &Args) -> Result<ControllerAppConfig, BootstrapError> {
    let mut config = match &args.config {
        Some(path) => ControllerAppConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            ControllerAppConfig::load(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => ControllerAppConfig::default(),
    };
    args.process.apply(&mut config.process)?;
    Ok(config)
}
