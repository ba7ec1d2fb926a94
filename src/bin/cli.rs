//! deltaray CLI - Run the delta-ray reconstruction over event files
//!
//! Usage:
//!   deltaray-cli run <events.json>... [--config <file>] [--output <dir>]
//!   deltaray-cli generate <events.json> [--events <n>] [--muons <n>] [--seed <n>]
//!
//! `run` reconstructs every event of every file and writes one partition
//! file per input. An event that fails is reported and skipped; the other
//! events are still processed.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use deltaray::event::{read_events, write_json, EventPartition};
use deltaray::pipeline::{reconstruct_event, EventReport};
use deltaray::synthetic::SyntheticScenario;
use deltaray::{ReconstructionConfig, ReconstructionError};

#[derive(Parser)]
#[command(name = "deltaray-cli")]
#[command(about = "Delta-ray / cosmic-ray separation over event files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct events from JSON event files
    Run {
        /// Event files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// JSON configuration; missing fields take defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory for partition files
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the track extension
        #[arg(long)]
        no_extension: bool,
    },

    /// Write synthetic cosmic-ray events
    Generate {
        /// Output event file
        output: PathBuf,

        /// Number of events
        #[arg(short, long, default_value = "10")]
        events: usize,

        /// Muons per event
        #[arg(short, long, default_value = "3")]
        muons: usize,

        /// Delta rays per muon
        #[arg(long, default_value = "2")]
        delta_rays: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    match cli.command {
        Commands::Run {
            files,
            config,
            output,
            no_extension,
        } => {
            let mut config = match config {
                Some(path) => match ReconstructionConfig::from_json_file(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("Error loading {}: {}", path.display(), e);
                        return ExitCode::FAILURE;
                    }
                },
                None => ReconstructionConfig::default(),
            };
            if no_extension {
                config.run_track_extension = false;
            }
            run_files(&files, &config, output.as_deref(), cli.verbose)
        }
        Commands::Generate {
            output,
            events,
            muons,
            delta_rays,
            seed,
        } => {
            let scenario = SyntheticScenario {
                muon_count: muons,
                delta_rays_per_muon: delta_rays,
                seed,
                ..SyntheticScenario::default()
            };
            let records: Vec<_> = scenario
                .generate_events(events)
                .into_iter()
                .map(|e| e.record)
                .collect();
            match write_json(&output, &records) {
                Ok(()) => {
                    println!("Wrote {} events to {}", records.len(), output.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error writing {}: {}", output.display(), e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Reconstruct every event of every file. Returns failure if any file or
/// event failed.
fn run_files(
    files: &[PathBuf],
    config: &ReconstructionConfig,
    output: Option<&Path>,
    verbose: bool,
) -> ExitCode {
    let mut failures = 0;

    for path in files {
        println!("\n{}", "=".repeat(60));
        println!("Processing: {}", path.display());
        println!("{}", "=".repeat(60));

        let records = match read_events(path) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("  [ERR] Failed to read {}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };

        let mut partitions: Vec<EventPartition> = Vec::with_capacity(records.len());
        for record in &records {
            let mut event = match record.load() {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("  [ERR] Event {}: {}", record.event_id, e);
                    failures += 1;
                    continue;
                }
            };

            match reconstruct_event(&mut event.store, &event.geometry, config) {
                Ok(report) => {
                    print_report(record.event_id, &report, verbose);
                    partitions.push(event.partition());
                }
                Err(e) => {
                    eprintln!("  [ERR] Event {}: {}", record.event_id, e);
                    failures += 1;
                }
            }
        }

        if let Some(dir) = output {
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("events");
            let target = dir.join(format!("{name}.partition.json"));
            if let Err(e) = std::fs::create_dir_all(dir)
                .map_err(ReconstructionError::from)
                .and_then(|()| write_json(&target, &partitions)) {
                eprintln!("  [ERR] Failed to write {}: {}", target.display(), e);
                failures += 1;
            } else {
                println!("  Wrote {}", target.display());
            }
        }
    }

    if failures > 0 {
        eprintln!("\n{failures} failures");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_report(event_id: u64, report: &EventReport, verbose: bool) {
    println!(
        "  [OK] Event {}: {} delta rays, {} tensor elements, {} tool changes",
        event_id, report.delta_ray_pfos, report.matching.initial_elements, report.matching.changes
    );
    if !verbose {
        return;
    }
    if report.matching.repeats_exhausted {
        println!("    Tool repeat cap reached");
    }
    if let Some(extension) = &report.extension {
        println!(
            "    Extension: {} associations, {} tracks extended, {} hits added",
            extension.associations_considered, extension.tracks_extended, extension.hits_added
        );
    }
}
