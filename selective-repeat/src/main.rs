//! Entry point for `selective-repeat`.
//!
//! Parses CLI arguments, runs one simulation, and prints the event trace
//! followed by a summary.  All protocol work is delegated to the library;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing).

use anyhow::{bail, Result};
use clap::Parser;

use selective_repeat::controller::MAX_PACE_FACTOR;
use selective_repeat::sink::{FacadeLog, NullRenderer};
use selective_repeat::{FaultModes, Mode, RunStatus, SimConfig, Simulation};

/// Selective-Repeat ARQ over a simulated lossy channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Number of frames to deliver.
    #[arg(short = 'n', long, default_value_t = 8)]
    frames: u32,

    /// Sender and receiver window size.
    #[arg(short, long, default_value_t = 4)]
    window: u32,

    /// Frame delay mode: none, random, fixed:N or kth:K.
    #[arg(long, default_value = "none")]
    frame_delay: Mode,

    /// Frame loss mode: none, random, fixed:N or kth:K.
    #[arg(long, default_value = "none")]
    frame_loss: Mode,

    /// ACK delay mode: none, random, fixed:N or kth:K.
    #[arg(long, default_value = "none")]
    ack_delay: Mode,

    /// ACK loss mode: none, random, fixed:N or kth:K.
    #[arg(long, default_value = "none")]
    ack_loss: Mode,

    /// Seed for random modes (omit for a fresh run every time).
    #[arg(long)]
    seed: Option<u64>,

    /// Replay in wall-clock time scaled by this factor (0 = fast-forward).
    #[arg(long, default_value_t = 0.0, value_parser = parse_pace)]
    pace: f64,

    /// Print only the summary, not the event trace.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_pace(s: &str) -> Result<f64, String> {
    let factor: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=MAX_PACE_FACTOR).contains(&factor) {
        return Err(format!("pace must be between 0 and {MAX_PACE_FACTOR}"));
    }
    Ok(factor)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let mut config = SimConfig::new(cli.frames, cli.window).with_modes(FaultModes {
        frame_delay: cli.frame_delay,
        frame_loss: cli.frame_loss,
        ack_delay: cli.ack_delay,
        ack_loss: cli.ack_loss,
    });
    config.seed = cli.seed;

    let mut sim = Simulation::with_sinks(Box::new(FacadeLog), Box::new(NullRenderer));
    sim.start(config)?;

    let status = if cli.pace > 0.0 {
        let shutdown = async {
            // Without a handler the run simply cannot be interrupted.
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("[sim] ctrl-c handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        };
        sim.run_paced_until(cli.pace, shutdown).await
    } else {
        sim.run_to_completion()
    };

    if !cli.quiet {
        for record in sim.trace() {
            println!("{record}");
        }
    }
    println!("status: {status} after {} ms", sim.elapsed().as_millis());
    println!("{}", sim.stats());

    finish(status)
}

/// A run that did not complete is reported as a failure exit.
fn finish(status: RunStatus) -> Result<()> {
    if status != RunStatus::Completed {
        bail!("run ended {status}");
    }
    Ok(())
}
