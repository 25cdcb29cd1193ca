use std::fs::File;
use std::hash::Hash;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use dashmap::DashSet;
use flate2::read::GzDecoder;
use glob::glob;
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde_json::Value;

use crate::error::EtlError;

/// Counters accumulated over one scan of one input domain.
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub files: usize,
    pub failed_files: Vec<PathBuf>,
    pub records: usize,
    pub malformed: usize,
    pub duplicates: usize,
}

#[derive(Debug, Default)]
struct FileTally {
    records: usize,
    malformed: usize,
    duplicates: usize,
}

/// Finds `.json` / `.json.gz` files anywhere under `<root>/<subtree>/`.
pub fn find_json_files(root: &Path, subtree: &str) -> Result<Vec<PathBuf>> {
    let base = root.join(subtree);
    let mut paths: Vec<PathBuf> = Vec::new();
    for suffix in ["**/*.json", "**/*.json.gz"] {
        let pattern = base.join(suffix);
        let pattern_str = pattern.to_string_lossy();
        info!("Searching for files matching pattern: {}", pattern_str);
        for entry in glob(&pattern_str)
            .with_context(|| format!("Invalid glob pattern: {}", pattern_str))?
        {
            match entry {
                Ok(path) => paths.push(path),
                Err(e) => warn!("Skipping unreadable glob entry: {}", e),
            }
        }
    }
    paths.sort();
    if paths.is_empty() {
        warn!("No input files found under {}", base.display());
    }
    Ok(paths)
}

/// Parses every file into typed records with exact-duplicate suppression.
///
/// Files are processed in parallel; each worker sends its parsed batch over
/// a bounded channel to a single collector so record accumulation never
/// contends. The `DashSet` of fingerprints is shared across workers, which
/// makes the whole-record dedup global even though file order is not
/// deterministic. Records that fail schema coercion and lines that are not
/// JSON are skipped and counted, never fatal; a file that cannot be read at
/// all is reported in `failed_files`.
pub fn scan_records<T, K, P, F>(
    files: &[PathBuf],
    progress: &ProgressBar,
    parse: P,
    fingerprint: F,
) -> (Vec<T>, ScanStats)
where
    T: Send,
    K: Eq + Hash + Send + Sync,
    P: Fn(&Value) -> Result<T, EtlError> + Sync,
    F: Fn(&T) -> K + Sync,
{
    let seen: DashSet<K> = DashSet::new();
    let capacity = (rayon::current_num_threads() * 2).max(16);
    let (sender, receiver) = bounded::<(Vec<T>, FileTally)>(capacity);

    let mut stats = ScanStats {
        files: files.len(),
        ..ScanStats::default()
    };

    let (records, tally, failed) = std::thread::scope(|scope| {
        let collector = scope.spawn(move || {
            let mut records = Vec::new();
            let mut tally = FileTally::default();
            for (batch, file_tally) in receiver {
                records.extend(batch);
                tally.records += file_tally.records;
                tally.malformed += file_tally.malformed;
                tally.duplicates += file_tally.duplicates;
            }
            (records, tally)
        });

        let failed: Vec<PathBuf> = files
            .par_iter()
            .filter_map(|path| {
                match scan_file(path, &parse, &fingerprint, &seen) {
                    Ok((batch, file_tally)) => {
                        let name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| path.display().to_string());
                        progress.set_message(format!(
                            "OK: {} ({} records)",
                            name, file_tally.records
                        ));
                        if sender.send((batch, file_tally)).is_err() {
                            error!(
                                "Failed to send batch from {} to collector. Collector likely panicked.",
                                path.display()
                            );
                        }
                        progress.inc(1);
                        None
                    }
                    Err(e) => {
                        error!("Error reading file {}: {:#}", path.display(), e);
                        progress.inc(1);
                        Some(path.clone())
                    }
                }
            })
            .collect();

        drop(sender);
        match collector.join() {
            Ok((records, tally)) => (records, tally, failed),
            Err(_) => {
                error!("Collector thread panicked; treating all input files as failed.");
                (Vec::new(), FileTally::default(), files.to_vec())
            }
        }
    });

    stats.records = tally.records;
    stats.malformed = tally.malformed;
    stats.duplicates = tally.duplicates;
    stats.failed_files = failed;
    (records, stats)
}

fn scan_file<T, K, P, F>(
    path: &Path,
    parse: &P,
    fingerprint: &F,
    seen: &DashSet<K>,
) -> Result<(Vec<T>, FileTally)>
where
    K: Eq + Hash,
    P: Fn(&Value) -> Result<T, EtlError>,
    F: Fn(&T) -> K,
{
    let content = read_input(path)?;
    let mut out = Vec::new();
    let mut tally = FileTally::default();

    let mut ingest = |value: &Value| {
        if !value.is_object() {
            tally.malformed += 1;
            debug!(
                "Skipping non-object record in {}: {}",
                path.display(),
                value
            );
            return;
        }
        match parse(value) {
            Ok(record) => {
                if seen.insert(fingerprint(&record)) {
                    tally.records += 1;
                    out.push(record);
                } else {
                    tally.duplicates += 1;
                }
            }
            Err(e) => {
                tally.malformed += 1;
                debug!("Skipping record in {}: {}", path.display(), e);
            }
        }
    };

    // A file is either one JSON document (object or array of objects, as
    // the catalog ships) or newline-delimited records (as the activity log
    // ships). Try the document form first; fall back to line-by-line.
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(values)) => values.iter().for_each(&mut ingest),
        Ok(value) => ingest(&value),
        Err(_) => {
            let mut bad_lines = 0usize;
            for (line_num, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => ingest(&value),
                    Err(e) => {
                        bad_lines += 1;
                        warn!(
                            "Error parsing JSON from {}:{}: {}",
                            path.display(),
                            line_num + 1,
                            e
                        );
                    }
                }
            }
            drop(ingest);
            tally.malformed += bad_lines;
        }
    }

    Ok((out, tally))
}

fn read_input(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut content = String::new();
    if path.extension().map_or(false, |ext| ext == "gz") {
        GzDecoder::new(file)
            .read_to_string(&mut content)
            .with_context(|| format!("Failed to decompress {}", path.display()))?;
    } else {
        let mut file = file;
        file.read_to_string(&mut content)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::EventRecord;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn discovers_json_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "log_data/2018/11/a.json", "{}");
        write_file(dir.path(), "log_data/2018/11/b.json", "{}");
        write_file(dir.path(), "log_data/readme.txt", "not data");
        let files = find_json_files(dir.path(), "log_data").unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn scans_ndjson_skipping_bad_lines_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "events.json",
            concat!(
                "{\"userId\":\"1\",\"ts\":1000,\"page\":\"NextSong\"}\n",
                "not json at all\n",
                "{\"userId\":\"1\",\"ts\":1000,\"page\":\"NextSong\"}\n",
                "{\"userId\":\"2\",\"ts\":2000,\"page\":\"Home\"}\n",
                "{\"userId\":\"3\",\"ts\":\"oops\"}\n",
            ),
        );
        let progress = ProgressBar::hidden();
        let (records, stats) = scan_records(
            &[file],
            &progress,
            EventRecord::from_value,
            EventRecord::fingerprint,
        );
        assert_eq!(records.len(), 2);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.malformed, 2);
        assert!(stats.failed_files.is_empty());
    }

    #[test]
    fn duplicates_are_suppressed_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.json", "{\"userId\":\"1\",\"ts\":1000}\n");
        let b = write_file(dir.path(), "b.json", "{\"userId\":\"1\",\"ts\":1000}\n");
        let progress = ProgressBar::hidden();
        let (records, stats) = scan_records(
            &[a, b],
            &progress,
            EventRecord::from_value,
            EventRecord::fingerprint,
        );
        assert_eq!(records.len(), 1);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn reads_single_document_and_gzip_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let plain = write_file(dir.path(), "one.json", "{\"userId\":\"7\",\"ts\":5}");

        let gz_path = dir.path().join("two.json.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&gz_path).unwrap(),
            flate2::Compression::default(),
        );
        encoder
            .write_all(b"{\"userId\":\"8\",\"ts\":6}\n")
            .unwrap();
        encoder.finish().unwrap();

        let progress = ProgressBar::hidden();
        let (records, stats) = scan_records(
            &[plain, gz_path],
            &progress,
            EventRecord::from_value,
            EventRecord::fingerprint,
        );
        assert_eq!(records.len(), 2);
        assert_eq!(stats.malformed, 0);
    }
}
