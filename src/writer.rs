use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use log::{info, warn};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;
use uuid::Uuid;

use crate::error::EtlError;

/// Where rows with a null partition value land, following the Hive
/// convention so downstream readers treat them as expected.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// What one table write produced.
#[derive(Debug)]
pub struct TableReport {
    pub table: String,
    pub rows: usize,
    pub partitions: usize,
}

/// Formats one partition-path segment, `column=value`.
pub fn partition_segment<T: Display>(column: &str, value: Option<T>) -> String {
    match value {
        Some(v) => format!("{}={}", column, v),
        None => format!("{}={}", column, HIVE_DEFAULT_PARTITION),
    }
}

/// Writes an unpartitioned table: one Parquet file under
/// `<output_root>/<table>/`, full overwrite.
pub fn write_table<R, B>(
    output_root: &Path,
    table: &str,
    rows: &[R],
    to_batch: B,
) -> Result<TableReport, EtlError>
where
    R: Sync,
    B: Fn(&[&R]) -> Result<RecordBatch, ArrowError> + Sync,
{
    let groups = BTreeMap::from([(String::new(), rows.iter().collect::<Vec<&R>>())]);
    write_groups(output_root, table, rows.len(), groups, to_batch)
}

/// Writes a table partitioned by `partition_key`, which maps a row to its
/// Hive-style relative directory (e.g. `year=2018/month=11`). All rows
/// sharing a key land in the same subdivision; the whole table location is
/// replaced atomically or not at all.
pub fn write_partitioned_table<R, B, K>(
    output_root: &Path,
    table: &str,
    rows: &[R],
    to_batch: B,
    partition_key: K,
) -> Result<TableReport, EtlError>
where
    R: Sync,
    B: Fn(&[&R]) -> Result<RecordBatch, ArrowError> + Sync,
    K: Fn(&R) -> String,
{
    let mut groups: BTreeMap<String, Vec<&R>> = BTreeMap::new();
    for row in rows {
        groups.entry(partition_key(row)).or_default().push(row);
    }
    if groups.is_empty() {
        // Empty table: still emit one empty file so the schema lands on disk.
        groups.insert(String::new(), Vec::new());
    }
    write_groups(output_root, table, rows.len(), groups, to_batch)
}

fn write_groups<R, B>(
    output_root: &Path,
    table: &str,
    row_count: usize,
    groups: BTreeMap<String, Vec<&R>>,
    to_batch: B,
) -> Result<TableReport, EtlError>
where
    R: Sync,
    B: Fn(&[&R]) -> Result<RecordBatch, ArrowError> + Sync,
{
    let final_dir = output_root.join(table);
    let staging = output_root.join(format!(".{}-staging-{}", table, Uuid::new_v4()));
    let partitions = groups.len();

    let written = stage_partitions(&staging, &groups, &to_batch)
        .and_then(|_| swap_into_place(output_root, table, &final_dir, &staging));

    match written {
        Ok(()) => {
            info!(
                "Wrote table '{}': {} rows across {} partition(s) at {}",
                table,
                row_count,
                partitions,
                final_dir.display()
            );
            Ok(TableReport {
                table: table.to_string(),
                rows: row_count,
                partitions,
            })
        }
        Err(e) => {
            // Failed mid-stage: prior output is untouched, drop the staging.
            if staging.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(
                        "Could not remove staging directory {}: {}",
                        staging.display(),
                        cleanup
                    );
                }
            }
            Err(EtlError::WriteFailure {
                table: table.to_string(),
                location: final_dir,
                source: e,
            })
        }
    }
}

fn stage_partitions<R, B>(
    staging: &Path,
    groups: &BTreeMap<String, Vec<&R>>,
    to_batch: &B,
) -> Result<()>
where
    R: Sync,
    B: Fn(&[&R]) -> Result<RecordBatch, ArrowError> + Sync,
{
    fs::create_dir_all(staging)
        .with_context(|| format!("Failed to create staging directory {}", staging.display()))?;

    groups.par_iter().try_for_each(|(subdir, group)| {
        let dir = if subdir.is_empty() {
            staging.to_path_buf()
        } else {
            staging.join(subdir)
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create partition directory {}", dir.display()))?;

        let batch = to_batch(group)
            .with_context(|| format!("Failed to build record batch for partition '{}'", subdir))?;
        let path = dir.join("part-00000.parquet");
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .with_context(|| format!("Failed to open Parquet writer for {}", path.display()))?;
        writer
            .write(&batch)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        writer
            .close()
            .with_context(|| format!("Failed to finalize {}", path.display()))?;
        Ok(())
    })
}

/// Swaps the fully staged table into place. The previous output is moved
/// aside first and only deleted after the new directory is live, so a
/// failure at any step leaves either the old or the new table complete,
/// never a mix.
fn swap_into_place(
    output_root: &Path,
    table: &str,
    final_dir: &Path,
    staging: &Path,
) -> Result<()> {
    let retired: PathBuf = output_root.join(format!(".{}-retired-{}", table, Uuid::new_v4()));

    let had_previous = final_dir.exists();
    if had_previous {
        fs::rename(final_dir, &retired).with_context(|| {
            format!("Failed to move previous output aside: {}", final_dir.display())
        })?;
    }
    if let Err(e) = fs::rename(staging, final_dir) {
        if had_previous {
            let _ = fs::rename(&retired, final_dir);
        }
        return Err(e).with_context(|| {
            format!("Failed to move staged table into {}", final_dir.display())
        });
    }
    if had_previous {
        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!(
                "Table '{}' committed but previous output lingers at {}: {}",
                table,
                retired.display(),
                e
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::SongplayRow;
    use crate::tables;
    use arrow::array::{Array, Int32Array, Int64Array};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn play(id: i64, ts: i64, year: i32, month: i32) -> SongplayRow {
        SongplayRow {
            songplay_id: id,
            start_time: ts,
            user_id: Some("42".to_string()),
            level: Some("free".to_string()),
            song_id: Some("S1".to_string()),
            artist_id: Some("A1".to_string()),
            session_id: Some(1),
            location: None,
            user_agent: None,
            year,
            month,
        }
    }

    fn songplay_partition(row: &SongplayRow) -> String {
        format!(
            "{}/{}",
            partition_segment("year", Some(row.year)),
            partition_segment("month", Some(row.month))
        )
    }

    fn read_all(path: &Path) -> Vec<RecordBatch> {
        ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
            .unwrap()
            .build()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn rows_land_in_their_partition() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            play(0, 1000, 2018, 11),
            play(1, 2000, 2018, 11),
            play(2, 3000, 2018, 12),
        ];
        let report = write_partitioned_table(
            dir.path(),
            "songplays",
            &rows,
            tables::songplays_batch,
            songplay_partition,
        )
        .unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(report.partitions, 2);

        let nov = dir
            .path()
            .join("songplays/year=2018/month=11/part-00000.parquet");
        let batches = read_all(&nov);
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 2);
        // Partition correctness: every row under year=2018/month=11 carries
        // those exact values.
        for batch in &batches {
            let year = batch
                .column(9)
                .as_any()
                .downcast_ref::<Int32Array>()
                .unwrap();
            let month = batch
                .column(10)
                .as_any()
                .downcast_ref::<Int32Array>()
                .unwrap();
            for i in 0..batch.num_rows() {
                assert_eq!(year.value(i), 2018);
                assert_eq!(month.value(i), 11);
            }
        }
    }

    #[test]
    fn rerun_fully_replaces_prior_output() {
        let dir = tempfile::tempdir().unwrap();
        let first = vec![play(0, 1000, 2018, 11)];
        write_partitioned_table(
            dir.path(),
            "songplays",
            &first,
            tables::songplays_batch,
            songplay_partition,
        )
        .unwrap();
        assert!(dir.path().join("songplays/year=2018/month=11").exists());

        let second = vec![play(0, 1000, 2019, 1)];
        write_partitioned_table(
            dir.path(),
            "songplays",
            &second,
            tables::songplays_batch,
            songplay_partition,
        )
        .unwrap();
        // The old subdivision is gone, not merged.
        assert!(!dir.path().join("songplays/year=2018").exists());
        assert!(dir.path().join("songplays/year=2019/month=1").exists());
    }

    #[test]
    fn unpartitioned_table_is_a_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![play(0, 1000, 2018, 11)];
        write_table(dir.path(), "songplays", &rows, tables::songplays_batch).unwrap();
        let file = dir.path().join("songplays/part-00000.parquet");
        let batches = read_all(&file);
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 1);
        let ids = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.value(0), 0);
    }

    #[test]
    fn empty_table_still_writes_schema() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<SongplayRow> = Vec::new();
        let report = write_partitioned_table(
            dir.path(),
            "songplays",
            &rows,
            tables::songplays_batch,
            songplay_partition,
        )
        .unwrap();
        assert_eq!(report.rows, 0);
        let file = dir.path().join("songplays/part-00000.parquet");
        let batches = read_all(&file);
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 0);
    }

    #[test]
    fn failed_write_leaves_prior_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![play(0, 1000, 2018, 11)];
        write_partitioned_table(
            dir.path(),
            "songplays",
            &rows,
            tables::songplays_batch,
            songplay_partition,
        )
        .unwrap();

        let boom = |_: &[&SongplayRow]| -> Result<RecordBatch, ArrowError> {
            Err(ArrowError::ComputeError("forced failure".to_string()))
        };
        let err = write_partitioned_table(dir.path(), "songplays", &rows, boom, songplay_partition)
            .unwrap_err();
        assert!(matches!(err, EtlError::WriteFailure { .. }));

        // Prior output survives and no staging debris remains.
        assert!(dir
            .path()
            .join("songplays/year=2018/month=11/part-00000.parquet")
            .exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn null_partition_values_use_the_hive_default() {
        assert_eq!(
            partition_segment::<i32>("year", None),
            "year=__HIVE_DEFAULT_PARTITION__"
        );
        assert_eq!(partition_segment("year", Some(2000)), "year=2000");
    }
}
