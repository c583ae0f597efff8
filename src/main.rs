//! Main entry point for the noisyzip CLI app.

use std::io::{self, Write};
use std::sync::Mutex;

use clap::Parser;

use noisyzip::cli::{Args, Commands};
use noisyzip::hooks::Hooks;
use noisyzip::{recover, workers};

fn main() -> std::process::ExitCode {
    env_logger::init();
    if let Err(e) = run_app() {
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Create(create) => {
            let cfg = create.into_config()?;
            let out_zip = cfg.out_zip.clone();
            let progress = cli_progress();
            let log = |msg: &str| eprintln!("{}", msg);
            let hooks = Hooks { on_progress: Some(&progress), on_log: Some(&log) };

            let total = workers::build_archive(&cfg, &hooks)?;
            eprintln!();
            println!("Packed {} entries into {}", total, out_zip.display());
        }
        Commands::Recover(args) => {
            let (in_zip, out_zip, opts) = args.into_plan()?;
            let progress = cli_progress();
            let log = |msg: &str| eprintln!("{}", msg);
            let hooks = Hooks { on_progress: Some(&progress), on_log: Some(&log) };

            let (recovered, rebuilt) = recover::recover_to_zip(&in_zip, &out_zip, &opts, &hooks)?;
            eprintln!();
            println!(
                "Recovered {} files, rebuilt {} entries into {}",
                recovered,
                rebuilt,
                out_zip.display()
            );
        }
    }

    Ok(())
}

/// A single-line progress display: overwrite the line in place, throttled by
/// the terminal being the bottleneck anyway.
fn cli_progress() -> impl Fn(usize, usize, &str) + Send + Sync {
    let prev_len = Mutex::new(0usize);
    move |done: usize, total: usize, name: &str| {
        let mut line = format!("[{}/{}] {}", done, total, name);
        let mut prev = prev_len.lock().unwrap();
        if *prev > line.len() {
            line.push_str(&" ".repeat(*prev - line.len()));
        }
        *prev = line.len();
        eprint!("\r{}", line);
        io::stderr().flush().ok();
    }
}
