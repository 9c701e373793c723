//! # knitstream CLI
//!
//! Command-line interface for previewing patterns and streaming them to a
//! knitting machine.
//!
//! ## Usage
//!
//! ```bash
//! # Show the computed pattern for a tile between the default point cams
//! knitstream preview --tile heart.txt
//!
//! # Wider span, mirrored, saved as PNG
//! knitstream preview --tile heart.txt --cams -40,40 --config mirror.json --png out.png
//!
//! # Knit on the real machine until Ctrl-C
//! knitstream knit --tile heart.txt --device /dev/ttyACM0
//!
//! # Dry run against the simulated machine
//! knitstream knit --tile heart.txt --simulate --passes 10
//!
//! # HTTP control surface
//! knitstream serve --listen 0.0.0.0:8080
//! ```

use clap::{Args, Parser, Subcommand};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use std::path::{Path, PathBuf};
use std::time::Duration;

use knitstream::{
    Bitmap, ConnectionSession, KnitError, MachineConfig,
    knitting::{CarriageSide, KnittingState},
    pattern::{PatternConfig, select_row},
    server::{self, ServerConfig},
    session::{Controller, SessionEvent},
    transport::{SerialTransport, SimulatedMachine, serial::DEFAULT_DEVICE},
};

/// knitstream - Knitting machine pattern streamer
#[derive(Parser, Debug)]
#[command(name = "knitstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Write a rotating log file to this directory (warnings still go to stderr)
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Pattern inputs shared by every subcommand.
#[derive(Args, Debug)]
struct PatternArgs {
    /// Base tile (ASCII art, or JSON bitmap with a .json extension)
    #[arg(long, value_name = "FILE")]
    tile: Option<PathBuf>,

    /// Pattern configuration JSON
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Point cam positions as LEFT,RIGHT
    #[arg(long, value_name = "LEFT,RIGHT", allow_hyphen_values = true, value_parser = parse_cams)]
    cams: Option<[i32; 2]>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the computed pattern
    Preview {
        #[command(flatten)]
        pattern: PatternArgs,

        /// Output to PNG file as well
        #[arg(long, value_name = "FILE")]
        png: Option<PathBuf>,

        /// PNG pixels per needle
        #[arg(long, default_value = "8")]
        scale: u32,

        /// Also show the needles sent for this row
        #[arg(long)]
        row: Option<usize>,

        /// Carriage side used with --row
        #[arg(long, default_value = "left", value_parser = parse_side)]
        side: CarriageSide,
    },

    /// Connect to the machine and stream rows until Ctrl-C
    Knit {
        #[command(flatten)]
        pattern: PatternArgs,

        /// Controller serial device
        #[arg(long, default_value = DEFAULT_DEVICE)]
        device: String,

        /// Use the simulated machine instead of a serial device
        #[arg(long)]
        simulate: bool,

        /// Simulated carriage pass time in milliseconds
        #[arg(long, default_value = "500")]
        pass_ms: u64,

        /// Stop the simulated carriage after this many passes
        #[arg(long)]
        passes: Option<usize>,

        /// Row to start at
        #[arg(long, default_value = "0")]
        start_row: usize,

        /// Carriage side at start
        #[arg(long, default_value = "left", value_parser = parse_side)]
        side: CarriageSide,
    },

    /// Start the HTTP control server
    Serve {
        #[command(flatten)]
        pattern: PatternArgs,

        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,

        /// Controller serial device
        #[arg(long, default_value = DEFAULT_DEVICE)]
        device: String,

        /// Connect to the simulated machine instead of a serial device
        #[arg(long)]
        simulate: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let _logger = init_logging(cli.log_dir.as_deref());

    if let Err(e) = run(cli.command) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(log_dir: Option<&Path>) -> Option<LoggerHandle> {
    let logger = match Logger::try_with_env_or_str("info") {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to configure logging: {}", e);
            return None;
        }
    };

    let logger = match log_dir {
        Some(dir) => logger
            .log_to_file(
                FileSpec::default()
                    .directory(dir)
                    .basename("knitstream")
                    .suffix("log")
                    .suppress_timestamp(),
            )
            .rotate(Criterion::Size(256 * 1024), Naming::Numbers, Cleanup::KeepLogFiles(3))
            .duplicate_to_stderr(Duplicate::Warn),
        None => logger.log_to_stderr(),
    };

    match logger.start() {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to start logger: {}", e);
            None
        }
    }
}

fn run(command: Commands) -> Result<(), KnitError> {
    match command {
        Commands::Preview {
            pattern,
            png,
            scale,
            row,
            side,
        } => {
            let mut controller = build_controller(&pattern, KnittingState::default())?;
            let computed = controller.computed_pattern();
            let cams = controller.knitting_state().point_cams;

            if computed.is_empty() {
                println!(
                    "Computed pattern is empty: cams [{}, {}] leave no room after margins",
                    cams[0], cams[1]
                );
                return Ok(());
            }

            println!(
                "Computed pattern: {}x{} (cams [{}, {}])",
                computed.width, computed.height, cams[0], cams[1]
            );
            print!("{}", computed.to_ascii());

            if let Some(row) = row {
                let needles = select_row(&computed, row, side).ok_or_else(|| {
                    KnitError::Pattern(format!(
                        "row {} out of range (height {})",
                        row, computed.height
                    ))
                })?;
                println!("\nRow {} ({}): {}", row, side, needles_to_string(&needles));
            }

            if let Some(path) = png {
                std::fs::write(&path, computed.to_png(scale)?)?;
                println!("\nSaved to {}", path.display());
            }
            Ok(())
        }

        Commands::Knit {
            pattern,
            device,
            simulate,
            pass_ms,
            passes,
            start_row,
            side,
        } => {
            let state = KnittingState {
                carriage_side: side,
                current_row_number: start_row,
                ..Default::default()
            };
            let controller = build_controller(&pattern, state)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(knit(controller, device, simulate, pass_ms, passes))
        }

        Commands::Serve {
            pattern,
            listen,
            device,
            simulate,
        } => {
            let controller = build_controller(&pattern, KnittingState::default())?;
            let session = ConnectionSession::new(controller, MachineConfig::SK840);
            let config = ServerConfig {
                device_path: device,
                listen_addr: listen,
                simulate,
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(config, session))
        }
    }
}

async fn knit(
    controller: Controller,
    device: String,
    simulate: bool,
    pass_ms: u64,
    passes: Option<usize>,
) -> Result<(), KnitError> {
    let machine = MachineConfig::SK840;
    let session = ConnectionSession::new(controller, machine);
    let mut events = session.subscribe();

    if simulate {
        println!("Connecting to simulated {}...", machine.name);
        let mut sim = SimulatedMachine::new(Duration::from_millis(pass_ms), passes);
        session.connect(&mut sim).await?;
    } else {
        println!("Connecting to {}...", device);
        let mut serial = SerialTransport::new(&device).with_baud_rate(machine.baud_rate);
        session.connect(&mut serial).await?;
    }

    session.start_patterning().await?;
    println!("Knitting. Press Ctrl-C to stop.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::RowSent(row)) => println!(
                    "row {:>4}  {:<5}  {}",
                    row.row_number,
                    row.side.to_string(),
                    needles_to_string(&row.needles)
                ),
                Ok(SessionEvent::Message(knitstream::protocol::Message::LogString { kind, text })) => {
                    println!("[device {:?}] {}", kind, text)
                }
                Ok(SessionEvent::Message(_)) => {}
                Ok(SessionEvent::Disconnected) => {
                    println!("Connection lost");
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Skipped {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    session.stop_patterning().await?;
    session.disconnect().await;

    let total = session
        .with_controller(|c| c.knitting_state().total_rows)
        .await;
    println!("Knitted {} rows", total);
    Ok(())
}

/// Assemble a controller from the pattern arguments.
fn build_controller(args: &PatternArgs, state: KnittingState) -> Result<Controller, KnitError> {
    let base = match &args.tile {
        Some(path) => Bitmap::load(path)?,
        None => Bitmap::from_rows(&[&[0, 1], &[1, 0]]),
    };
    let config = match &args.config {
        Some(path) => PatternConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => PatternConfig::default(),
    };

    base.validate()?;

    let mut controller = Controller::new(base, config, state);
    if let Some([left, right]) = args.cams {
        controller.set_point_cams(left, right)?;
    }
    Ok(controller)
}

fn needles_to_string(needles: &[u8]) -> String {
    needles
        .iter()
        .map(|&n| if n == 1 { '#' } else { '.' })
        .collect()
}

fn parse_cams(s: &str) -> Result<[i32; 2], String> {
    let (left, right) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LEFT,RIGHT, got '{}'", s))?;
    let left: i32 = left.trim().parse().map_err(|e| format!("bad left cam: {}", e))?;
    let right: i32 = right.trim().parse().map_err(|e| format!("bad right cam: {}", e))?;
    if left >= right {
        return Err(format!("left cam ({}) must be less than right cam ({})", left, right));
    }
    Ok([left, right])
}

fn parse_side(s: &str) -> Result<CarriageSide, String> {
    match s.to_lowercase().as_str() {
        "left" | "l" => Ok(CarriageSide::Left),
        "right" | "r" => Ok(CarriageSide::Right),
        other => Err(format!("unknown carriage side '{}'", other)),
    }
}
