use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use time::macros::format_description;

mod config;
mod dedup;
mod dimensions;
mod error;
mod fact;
mod reader;
mod records;
mod tables;
mod timeparts;
mod writer;

use config::RunConfig;
use records::{EventRecord, SongRecord};
use writer::{partition_segment, TableReport};

mod memory_usage {
    use log::info;

    #[cfg(target_os = "linux")]
    pub fn log_memory_usage(note: &str) {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(s) => s,
            Err(_) => {
                info!("Memory usage tracking not available ({})", note);
                return;
            }
        };
        let field = |key: &str| {
            status
                .lines()
                .find(|l| l.starts_with(key))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<f64>().ok())
        };
        match (field("VmRSS:"), field("VmSize:")) {
            (Some(rss_kb), Some(vm_kb)) => info!(
                "Memory usage ({}): {:.1} MB physical (RSS), {:.1} MB virtual",
                note,
                rss_kb / 1024.0,
                vm_kb / 1024.0
            ),
            _ => info!("Memory usage tracking not available ({})", note),
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn log_memory_usage(note: &str) {
        info!(
            "Memory usage tracking not available on this platform ({})",
            note
        );
    }
}

#[derive(Parser, Clone)]
#[command(name = "Songplay ETL - Star Schema Builder")]
#[command(
    about = "Transforms a raw track catalog and activity-log JSON into a partitioned Parquet star schema."
)]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(long, help = "Path to the run configuration YAML file", required = true)]
    run_config: PathBuf,
    #[arg(short, long, help = "Override the configured output root")]
    output: Option<PathBuf>,
    #[arg(
        short,
        long,
        default_value = "INFO",
        help = "Logging level (DEBUG, INFO, WARN, ERROR)"
    )]
    log_level: String,
    #[arg(
        short,
        long,
        default_value = "0",
        help = "Number of threads to use (0 for auto)"
    )]
    threads: usize,
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = elapsed.subsec_millis();
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, millis)
    }
}

fn progress_bar(len: usize, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec}) {msg}")
            .expect("Failed to create progress bar template")
            .progress_chars("=> "),
    );
    bar.set_message(message.to_string());
    bar
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", cli.log_level);
            LevelFilter::Info
        }
    };
    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .init()?;

    info!("Starting Songplay ETL - Star Schema Builder");
    memory_usage::log_memory_usage("initial");

    info!("Loading run configuration from: {}", cli.run_config.display());
    let config = RunConfig::load(&cli.run_config)?;
    if let Some(description) = &config.description {
        info!("Run: {}", description);
    }
    config.export_credentials();

    let input_root = config.input_root.clone();
    let output_root = cli.output.unwrap_or_else(|| config.output_root.clone());
    info!("Input root: {}", input_root.display());
    info!("Output root: {}", output_root.display());
    std::fs::create_dir_all(&output_root)?;

    let num_threads = if cli.threads == 0 {
        let cores = num_cpus::get();
        info!("Auto-detected {} CPU cores. Using {} threads.", cores, cores);
        cores
    } else {
        info!("Using specified {} threads.", cli.threads);
        cli.threads
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        error!("Failed to build global thread pool: {}. Proceeding with default.", e);
    }

    // ---- Catalog scan ------------------------------------------------------
    let song_files = reader::find_json_files(&input_root, "song_data")?;
    info!("Found {} catalog file(s).", song_files.len());
    let bar = progress_bar(song_files.len(), "Reading catalog...");
    let (catalog, catalog_stats) = reader::scan_records(
        &song_files,
        &bar,
        SongRecord::from_value,
        SongRecord::fingerprint,
    );
    bar.finish_with_message(format!(
        "Catalog read: {} records, {} duplicates, {} malformed.",
        catalog_stats.records, catalog_stats.duplicates, catalog_stats.malformed
    ));

    // ---- Activity-log scan -------------------------------------------------
    let log_files = reader::find_json_files(&input_root, "log_data")?;
    info!("Found {} activity-log file(s).", log_files.len());
    let bar = progress_bar(log_files.len(), "Reading activity log...");
    let (events, event_stats) = reader::scan_records(
        &log_files,
        &bar,
        EventRecord::from_value,
        EventRecord::fingerprint,
    );
    bar.finish_with_message(format!(
        "Activity log read: {} records, {} duplicates, {} malformed.",
        event_stats.records, event_stats.duplicates, event_stats.malformed
    ));

    let unreadable = catalog_stats.failed_files.len() + event_stats.failed_files.len();
    if unreadable > 0 {
        for path in catalog_stats
            .failed_files
            .iter()
            .chain(event_stats.failed_files.iter())
        {
            error!("Unreadable input file: {}", path.display());
        }
        bail!(
            "{} input file(s) could not be read; aborting before any table is written",
            unreadable
        );
    }

    // ---- Transform and write, one table at a time --------------------------
    let mut reports: Vec<TableReport> = Vec::new();

    let songs = dimensions::build_songs(&catalog);
    if songs.missing_key > 0 {
        warn!(
            "Skipped {} catalog record(s) without a song_id.",
            songs.missing_key
        );
    }
    reports.push(writer::write_partitioned_table(
        &output_root,
        "songs",
        &songs.rows,
        tables::songs_batch,
        |r| {
            format!(
                "{}/{}",
                partition_segment("year", r.year),
                partition_segment("artist_id", r.artist_id.as_deref())
            )
        },
    )?);

    let artists = dimensions::build_artists(&catalog);
    if artists.missing_key > 0 {
        warn!(
            "Skipped {} catalog record(s) without an artist_id.",
            artists.missing_key
        );
    }
    reports.push(writer::write_table(
        &output_root,
        "artists",
        &artists.rows,
        tables::artists_batch,
    )?);

    let users = dimensions::build_users(&events);
    info!(
        "Users dimension: {} users ({} event(s) without a user id).",
        users.rows.len(),
        users.missing_key
    );
    reports.push(writer::write_table(
        &output_root,
        "users",
        &users.rows,
        tables::users_batch,
    )?);

    let (time_rows, invalid_instants) = dimensions::build_time(&events);
    if invalid_instants > 0 {
        warn!(
            "Skipped {} timestamp(s) outside the valid epoch domain.",
            invalid_instants
        );
    }
    reports.push(writer::write_partitioned_table(
        &output_root,
        "time",
        &time_rows,
        tables::time_batch,
        |r| {
            format!(
                "{}/{}",
                partition_segment("year", Some(r.year)),
                partition_segment("month", Some(r.month))
            )
        },
    )?);

    let (songplays, fact_stats) = fact::build_songplays(&events, &catalog);
    info!(
        "Fact table: {} play event(s), {} joined row(s), {} without a catalog match, {} with invalid timestamps.",
        fact_stats.plays,
        songplays.len(),
        fact_stats.join_misses,
        fact_stats.invalid_timestamps
    );
    reports.push(writer::write_partitioned_table(
        &output_root,
        "songplays",
        &songplays,
        tables::songplays_batch,
        |r| {
            format!(
                "{}/{}",
                partition_segment("year", Some(r.year)),
                partition_segment("month", Some(r.month))
            )
        },
    )?);

    // ---- Summary -----------------------------------------------------------
    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!(
        "Catalog: {} file(s), {} record(s), {} duplicate(s), {} malformed.",
        catalog_stats.files, catalog_stats.records, catalog_stats.duplicates, catalog_stats.malformed
    );
    info!(
        "Activity log: {} file(s), {} record(s), {} duplicate(s), {} malformed.",
        event_stats.files, event_stats.records, event_stats.duplicates, event_stats.malformed
    );
    info!(
        "Join misses (play events with no catalog match): {}",
        fact_stats.join_misses
    );
    info!("Rows written per table:");
    for report in &reports {
        info!(
            "  - {}: {} row(s) in {} partition(s)",
            report.table, report.rows, report.partitions
        );
    }
    memory_usage::log_memory_usage("final");
    info!("ETL run finished.");
    info!("-------------------------------------------------------");

    Ok(())
}
