//! # vme_merger_cli
//!
//! Part of the vme_merger crate family.
//!
//! Replays raw VME stream files through the vme_merger event builder and reports what was
//! found in each of them.
//!
//! ## Use
//!
//! Make a template configuration with
//!
//! ```bash
//! vme_merger_cli -p config.yml new
//! ```
//!
//! fill in the input paths, and run with
//!
//! ```bash
//! vme_merger_cli -p config.yml
//! ```
//!
//! Details of the processing are written to `vme_merger.log` in the working directory.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use libvme_merger::config::Config;
use libvme_merger::error::ProcessorError;
use libvme_merger::process::{create_subsets, process_subset, StreamSummary, SubsetReport};
use libvme_merger::worker_status::WorkerStatus;

type Worker = JoinHandle<Result<SubsetReport, ProcessorError>>;

fn make_template_config(path: &Path) {
    let mut config = Config::default();
    config.input_paths = vec![PathBuf::from("/path/to/run_0001.dat")];
    match config.write_config_file(path) {
        Ok(()) => spdlog::info!("Wrote template config to {}", path.to_string_lossy()),
        Err(e) => {
            spdlog::error!("{e}");
            eprintln!("Failed to write template config: {e}");
        }
    }
}

/// Send everything to a log file, the terminal belongs to the progress bars
fn build_logger(path: &Path) -> Result<Arc<spdlog::Logger>, spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(path)
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    Ok(Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    ))
}

fn report(summary: &StreamSummary) {
    let stats = &summary.stats;
    let line = format!(
        "{} ({}): {} events ({} evicted, {} flushed), {} scaler snapshots, {} runs ended, {} active channels, {} ignored words, {} protocol errors",
        summary.input_path.to_string_lossy(),
        human_bytes::human_bytes(summary.size_bytes as f64),
        stats.events_emitted,
        stats.events_evicted,
        summary.flushed_events,
        stats.scaler_snapshots,
        stats.run_terminations,
        summary.active_channels(),
        stats.ignored_words,
        stats.protocol_errors,
    );
    spdlog::info!("{line}");
    println!("{line}");
}

fn main() {
    // Create a cli
    let matches = Command::new("vme_merger_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    match build_logger(Path::new("./vme_merger.log")) {
        Ok(logger) => spdlog::set_default_logger(logger),
        Err(e) => {
            eprintln!("Could not create the log file: {e}");
            return;
        }
    }
    spdlog::info!("Starting VME Merger CLI");

    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        make_template_config(&config_path);
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            eprintln!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        spdlog::error!("{e}");
        eprintln!("{e}");
        return;
    }
    if !config.is_n_threads_valid() {
        eprintln!("Number of threads must be at least 1");
        return;
    }
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Inputs: {}", config.input_paths.len());
    spdlog::info!(
        "Channels: {} Buffer Capacity: {}",
        config.unpacker.channel_count,
        config.unpacker.buffer_capacity
    );
    spdlog::info!(
        "Byte Order: {:?} Padding Policy: {:?} Protocol Errors: {:?}",
        config.unpacker.byte_order,
        config.unpacker.padding_policy,
        config.on_protocol_error
    );

    // Spawn the workers, each with its own progress bar
    let pb_manager = MultiProgress::new();
    let style = ProgressStyle::with_template("worker {prefix} {bar:40.cyan/blue} {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut workers: Vec<Worker> = vec![];
    let mut bars: Vec<Option<ProgressBar>> = vec![];
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            bars.push(None);
            continue;
        }
        let bar = pb_manager.add(ProgressBar::new(100));
        bar.set_style(style.clone());
        bar.set_prefix(idx.to_string());
        bars.push(Some(bar));

        let conf = config.clone();
        let worker_tx = tx.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(conf, worker_tx, idx, subset)
        }));
    }
    drop(tx);

    // Runs until every worker has hung up
    for status in rx.iter() {
        if let Some(Some(bar)) = bars.get(status.worker_id) {
            bar.set_position((status.progress * 100.0) as u64);
            if let Some(path) = config.input_paths.get(status.input_number) {
                if let Some(name) = path.file_name() {
                    bar.set_message(name.to_string_lossy().to_string());
                }
            }
        }
    }
    for bar in bars.iter().flatten() {
        bar.finish();
    }

    let mut failed = false;
    for worker in workers {
        match worker.join() {
            Ok(Ok(subset_report)) => {
                for summary in subset_report.summaries.iter() {
                    report(summary);
                }
                for (path, e) in subset_report.failures.iter() {
                    failed = true;
                    eprintln!("{} failed: {e}", path.to_string_lossy());
                }
            }
            Ok(Err(e)) => {
                failed = true;
                spdlog::error!("Processor error: {e}");
            }
            Err(_) => {
                failed = true;
                spdlog::error!("An error occured joining one of the workers!");
            }
        }
    }

    if failed {
        eprintln!("There was an error! Check the log file vme_merger.log for more information.");
    } else {
        spdlog::info!("Done.");
    }
}
