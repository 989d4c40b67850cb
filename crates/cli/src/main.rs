//! PANDO fabric simulator CLI.
//!
//! Loads a configuration file (or built-in defaults), populates a single
//! RISC-V core at `(0, 0, 0)` with the given ELF64 binary, and ticks the
//! machine until every hart exits or `--max-cycles` elapses.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pando_core::common::config::Config;
use pando_core::sim::topology::Simulator;

#[derive(Parser, Debug)]
#[command(
    name = "pando-sim",
    author,
    version,
    about = "Cycle-level simulator for the PANDO many-core fabric"
)]
struct Cli {
    /// RISC-V RV64IM ELF64 binary to run on core (0, 0, 0).
    program: PathBuf,

    /// Configuration file (TOML or JSON); built-in defaults if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of harts resident on the core.
    #[arg(long, default_value_t = 1)]
    num_harts: u32,

    /// Upper bound on simulated cycles before giving up.
    #[arg(long, default_value_t = 10_000_000)]
    max_cycles: u64,
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    if let Err(code) = run(&cli) {
        process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<(), i32> {
    let config = match &cli.config {
        Some(path) => Config::from_path(path).map_err(|e| {
            eprintln!("error: {e}");
            1
        })?,
        None => Config::default(),
    };

    let program = std::fs::read(&cli.program).map_err(|e| {
        eprintln!("error: reading {}: {e}", cli.program.display());
        1
    })?;

    let mut sim = Simulator::new(&config);
    sim.add_riscv_core((0, 0, 0), &program, cli.num_harts, Some(0)).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    let ran = sim.run(cli.max_cycles).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    if !sim.all_done() {
        eprintln!("simulation did not finish within {ran} cycles");
        return Err(1);
    }

    for (coords, codes) in sim.exit_codes() {
        for (hart, code) in codes.iter().enumerate() {
            println!("core {coords:?} hart {hart}: exit {code:?}");
        }
    }
    println!("{ran} cycles, {:#?}", sim.stats());

    let worst = sim.exit_codes().into_iter().flat_map(|(_, c)| c.iter().copied()).flatten().find(|&c| c != 0);
    if let Some(code) = worst {
        return Err(code);
    }
    Ok(())
}
