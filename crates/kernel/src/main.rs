use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use kernel::{render_status, Config, System};

/// Multi-core OS emulator: preemptive scheduling over demand-paged virtual
/// memory, driven from a config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.txt")]
    config: PathBuf,

    /// Directory for process logs, reports, and the backing store
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Seed for the random process generator
    #[arg(short, long)]
    seed: Option<u64>,

    /// Maximum time to let the scheduler run, in milliseconds
    #[arg(short = 't', long, default_value_t = 2000)]
    run_ms: u64,

    /// Print vmstat as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let system = System::configure(config, &args.output_dir, args.seed)?;

    system.start()?;
    let drained = system.wait_for_completion(Duration::from_millis(args.run_ms));
    system.stop();

    let report = system.list();
    println!("{}", "Scheduler run complete".bold().green());
    if !drained {
        println!(
            "{}",
            "(stopped before every process finished)".yellow()
        );
    }
    println!();
    print!("{}", render_status(&report));

    let path = system.report_util()?;
    println!("Utilization report written to {}", path.display());

    let vmstat = system.vmstat();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&vmstat)?);
    } else {
        println!();
        println!("{}", "vmstat".bold());
        println!(
            "  memory: {} used / {} total bytes",
            vmstat.used_memory, vmstat.total_memory
        );
        println!(
            "  frames: {} used / {} total ({} free)",
            vmstat.used_frames, vmstat.total_frames, vmstat.free_frames
        );
        println!(
            "  ticks:  {} active, {} idle, {} total",
            vmstat.active_ticks, vmstat.idle_ticks, vmstat.total_ticks
        );
        println!(
            "  paging: {} in, {} out",
            vmstat.pages_paged_in, vmstat.pages_paged_out
        );
    }
    Ok(())
}
