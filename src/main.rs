//! # RouterKing command line
//!
//! ```bash
//! # Segment count and extents of a program
//! routerking preview part.nc
//!
//! # Stream a program over the configured port
//! routerking --port /dev/ttyUSB0 stream part.nc
//!
//! # Measure X and Y travel and store the results as $130/$131
//! routerking explore X Y --apply
//! ```

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use routerking_lib::config::{self, AppConfig};
use routerking_lib::error::AppError;
use routerking_lib::explore::{LimitExplorationEngine, TickOutcome};
use routerking_lib::gcode::{iter_program_lines, parse_program};
use routerking_lib::protocol::{format_number, Axis, MachineSettings};
use routerking_lib::sender::StreamingSession;

/// Control-loop period for streaming and exploration.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// GRBL sender, G-code previewer and limit explorer.
#[derive(Parser, Debug)]
#[command(name = "routerking")]
#[command(version)]
#[command(about = "GRBL sender, G-code previewer and limit explorer")]
struct Args {
    /// Configuration file (defaults to the per-user config directory).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial port, overriding `connection.port` from the config.
    #[arg(short, long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the segment count and XY extents of a program.
    Preview { file: PathBuf },
    /// Stream a program, one line per acknowledgement.
    Stream { file: PathBuf },
    /// Probe each axis into its limit switch and report the travel.
    Explore {
        /// Axes in probing order; defaults to `exploration.axes`.
        axes: Vec<Axis>,
        /// Write the measured limits back as max-travel settings.
        #[arg(long)]
        apply: bool,
    },
}

fn main() {
    let args = Args::parse();
    let _guard = routerking_lib::init_tracing();

    if let Err(e) = run(args) {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), AppError> {
    let path = args.config.clone().unwrap_or_else(config::default_path);
    let mut cfg = config::load(&path)?;
    if let Some(port) = args.port {
        cfg.connection.port = port;
    }

    match args.command {
        Command::Preview { file } => preview(&file),
        Command::Stream { file } => stream(&cfg, &file),
        Command::Explore { axes, apply } => explore(&cfg, axes, apply),
    }
}

fn preview(file: &Path) -> Result<(), AppError> {
    let text = std::fs::read_to_string(file)?;
    let path = parse_program(&text);
    println!("{} segments", path.len());
    match path.bounds() {
        Some(b) => println!(
            "X {} .. {}  Y {} .. {}  ({} x {} mm)",
            format_number(b.min_x),
            format_number(b.max_x),
            format_number(b.min_y),
            format_number(b.max_y),
            format_number(b.width()),
            format_number(b.height()),
        ),
        None => println!("no motion"),
    }
    Ok(())
}

fn connect(cfg: &AppConfig) -> Result<StreamingSession, AppError> {
    let mut session =
        StreamingSession::with_settle(Duration::from_millis(cfg.connection.settle_ms));
    session.connect_serial(&cfg.connection)?;
    tracing::info!(port = %cfg.connection.port, "connected");
    Ok(session)
}

fn stream(cfg: &AppConfig, file: &Path) -> Result<(), AppError> {
    let text = std::fs::read_to_string(file)?;
    let mut session = connect(cfg)?;
    run_stream(&mut session, iter_program_lines(&text))?;
    session.disconnect();
    Ok(())
}

/// Streams `lines` and blocks until the stream ends, printing progress.
fn run_stream<I>(session: &mut StreamingSession, lines: I) -> Result<(), AppError>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    session.start_stream(lines)?;
    let mut reported = usize::MAX;
    while session.is_streaming() {
        for line in session.poll() {
            tracing::debug!(%line, "recv");
        }
        let progress = session.progress();
        if progress.acked != reported {
            reported = progress.acked;
            println!("{}/{}", progress.acked, progress.total);
        }
        thread::sleep(POLL_INTERVAL);
    }
    match &session.progress().last_error {
        Some(reason) => Err(AppError::Stream(reason.clone())),
        None => Ok(()),
    }
}

fn explore(cfg: &AppConfig, axes: Vec<Axis>, apply: bool) -> Result<(), AppError> {
    let axes = if axes.is_empty() {
        cfg.exploration.axes.clone()
    } else {
        axes
    };
    let mut session = connect(cfg)?;
    let mut engine =
        LimitExplorationEngine::new(cfg.exploration.clone(), MachineSettings::default());
    engine.start(&mut session, &axes, Instant::now())?;

    let report = loop {
        let outcome = engine.tick(&mut session, Instant::now());
        for message in engine.drain_messages() {
            println!("{message}");
        }
        match outcome {
            TickOutcome::Completed(report) => break report,
            TickOutcome::Aborted(reason) => {
                session.disconnect();
                return Err(AppError::Exploration(reason));
            }
            TickOutcome::Idle | TickOutcome::InProgress => thread::sleep(POLL_INTERVAL),
        }
    };

    let commands = report.settings_commands();
    if apply {
        println!("Writing {}", commands.join(" "));
        run_stream(&mut session, commands)?;
    } else {
        for command in &commands {
            println!("{command}");
        }
    }
    session.disconnect();
    Ok(())
}
