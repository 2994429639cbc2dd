//! Skirmish headless runner.
//!
//! Runs battles without graphics for lockstep peers, CI and AI hosting.
//!
//! # Usage
//!
//! ```bash
//! # Run a match locally and save a replay
//! skirmish-headless run --data data.json --scenario duel.json --ticks 600 --replay-out duel.replay
//!
//! # Join a relay hub as one lockstep peer
//! skirmish-headless run --data data.json --scenario duel.json --connect 127.0.0.1:31500
//!
//! # Drive a battle interactively with JSON lines
//! skirmish-headless session --data data.json --scenario duel.json
//!
//! # Serve the built-in AI over stdin/stdout (used for process AIs)
//! skirmish-headless agent --ai basic
//!
//! # Check a replay still reproduces its final hash
//! skirmish-headless replay --file duel.replay --verify
//! ```
//!
//! Reports go to stdout as JSON; logs go to stderr.

use std::io::{self, BufReader, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use skirmish_core::ai::{run_line_agent, AiRegistry};
use skirmish_core::config::DEFAULT_AI_TIME_TO_LIVE_SECS;
use skirmish_core::simulation::LoadOptions;
use skirmish_headless::runner::{
    agent_registry, benchmark, check_determinism, play_replay, run_match, MatchInputs,
    MatchOptions,
};
use skirmish_headless::{Result, Session};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "skirmish-headless")]
#[command(about = "Headless skirmish runner for lockstep peers, AI hosting and CI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Files a battle is loaded from.
#[derive(Args, Debug)]
struct InputArgs {
    /// Game data file (JSON)
    #[arg(short, long)]
    data: PathBuf,

    /// Scenario file (JSON)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Simulation settings (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl InputArgs {
    fn load(&self) -> Result<MatchInputs> {
        MatchInputs::load(&self.data, &self.scenario, self.config.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one match, locally or as a relay peer
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        /// Stop after this many ticks
        #[arg(short, long, default_value = "1000")]
        ticks: u64,

        /// Relay hub to join
        #[arg(long)]
        connect: Option<SocketAddr>,

        /// Ticks per second (default: 30 when connected, unpaced otherwise)
        #[arg(long)]
        tick_rate: Option<u32>,

        /// Do not run the scenario's AIs on this peer
        #[arg(long)]
        no_ais: bool,

        /// Save a replay here
        #[arg(long)]
        replay_out: Option<PathBuf>,
    },

    /// Drive a battle with JSON commands on stdin
    Session {
        #[command(flatten)]
        inputs: InputArgs,

        /// Output state after every tick command
        #[arg(long)]
        auto_state: bool,

        /// Run the scenario's AIs in the session
        #[arg(long)]
        host_ais: bool,
    },

    /// Serve a built-in AI over stdin/stdout
    Agent {
        /// AI class to serve
        #[arg(long, default_value = "basic")]
        ai: String,

        /// Exit after this many seconds
        #[arg(long, default_value_t = DEFAULT_AI_TIME_TO_LIVE_SECS)]
        ttl_secs: u64,
    },

    /// Play back a replay file
    Replay {
        /// Replay file path
        #[arg(short, long)]
        file: PathBuf,

        /// Verify replay produces identical hash
        #[arg(long)]
        verify: bool,
    },

    /// Verify determinism by running the same battle several times
    Verify {
        #[command(flatten)]
        inputs: InputArgs,

        /// Number of verification runs
        #[arg(short, long, default_value = "5")]
        runs: u32,

        /// Ticks per run
        #[arg(short, long, default_value = "600")]
        ticks: u64,
    },

    /// Run N ticks for benchmarking
    Benchmark {
        #[command(flatten)]
        inputs: InputArgs,

        /// Number of ticks to run
        #[arg(short, long, default_value = "36000")]
        ticks: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries reports and protocol lines
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("FAIL: {e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            inputs,
            ticks,
            connect,
            tick_rate,
            no_ais,
            replay_out,
        } => {
            let options = MatchOptions {
                ticks,
                connect,
                tick_rate,
                host_ais: !no_ais,
                replay_out,
            };
            let report = run_match(&inputs.load()?, &options)?;
            print_report(&report)
        }
        Commands::Session {
            inputs,
            auto_state,
            host_ais,
        } => {
            let inputs = inputs.load()?;
            let registry = if host_ais {
                agent_registry()?
            } else {
                AiRegistry::new()
            };
            let sim = inputs.battle(&registry, LoadOptions { host_ais })?;
            tracing::info!(scenario = %inputs.name, "Starting interactive session");
            let stdin = io::stdin();
            let mut stdout = io::stdout().lock();
            Session::new(sim, auto_state).run(stdin.lock(), &mut stdout)?;
            Ok(())
        }
        Commands::Agent { ai, ttl_secs } => {
            let agent = AiRegistry::with_builtin().make_agent(&ai)?;
            let exit = run_line_agent(
                agent,
                BufReader::new(io::stdin()),
                &mut io::stdout().lock(),
                Duration::from_secs(ttl_secs),
            );
            tracing::debug!(?exit, "Agent finished");
            Ok(())
        }
        Commands::Replay { file, verify } => {
            tracing::info!(path = %file.display(), verify, "Playing replay");
            let report = play_replay(&file, verify)?;
            if verify {
                eprintln!("PASS: Replay verification successful");
            }
            print_report(&report)
        }
        Commands::Verify {
            inputs,
            runs,
            ticks,
        } => {
            let report = check_determinism(&inputs.load()?, runs, ticks)?;
            eprintln!("PASS: All {runs} runs produced identical results");
            print_report(&report)
        }
        Commands::Benchmark { inputs, ticks } => {
            let report = benchmark(&inputs.load()?, ticks)?;
            print_report(&report)
        }
    }
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, report)?;
    writeln!(stdout)?;
    Ok(())
}
