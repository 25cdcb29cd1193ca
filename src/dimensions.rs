use std::collections::BTreeSet;

use log::debug;

use crate::dedup::{dedup_by_key, dedup_by_key_latest};
use crate::records::{EventRecord, SongRecord};
use crate::timeparts::{self, TimeParts};

/// Row of the `songs` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct SongRow {
    pub song_id: String,
    pub title: Option<String>,
    pub artist_id: Option<String>,
    pub year: Option<i32>,
    pub duration: Option<f64>,
}

/// Row of the `artists` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRow {
    pub artist_id: String,
    pub artist_name: Option<String>,
    pub artist_location: Option<String>,
    pub artist_latitude: Option<f64>,
    pub artist_longitude: Option<f64>,
}

/// Row of the `users` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
}

/// Output of one dimension projection: the rows plus how many source
/// records were dropped for lacking the dimension's identifier.
pub struct Projection<R> {
    pub rows: Vec<R>,
    pub missing_key: usize,
}

/// Projects the deduplicated catalog into the `songs` dimension. Records
/// without a `song_id` cannot carry an identity and are dropped.
pub fn build_songs(catalog: &[SongRecord]) -> Projection<SongRow> {
    let candidates: Vec<&SongRecord> = catalog.iter().collect();
    let (kept, missing_key) = dedup_by_key(candidates, |r| r.song_id.clone());
    let rows = kept
        .into_iter()
        .filter_map(|r| {
            r.song_id.clone().map(|song_id| SongRow {
                song_id,
                title: r.title.clone(),
                artist_id: r.artist_id.clone(),
                year: r.year,
                duration: r.duration,
            })
        })
        .collect();
    Projection { rows, missing_key }
}

/// Projects the deduplicated catalog into the `artists` dimension, the
/// second, independent projection of the same source stream.
pub fn build_artists(catalog: &[SongRecord]) -> Projection<ArtistRow> {
    let candidates: Vec<&SongRecord> = catalog.iter().collect();
    let (kept, missing_key) = dedup_by_key(candidates, |r| r.artist_id.clone());
    let rows = kept
        .into_iter()
        .filter_map(|r| {
            r.artist_id.clone().map(|artist_id| ArtistRow {
                artist_id,
                artist_name: r.artist_name.clone(),
                artist_location: r.artist_location.clone(),
                artist_latitude: r.artist_latitude,
                artist_longitude: r.artist_longitude,
            })
        })
        .collect();
    Projection { rows, missing_key }
}

/// Projects log events into the `users` dimension: rows with a usable
/// `userId` only, one row per user, most recent event wins so a mid-log
/// plan change ("free" to "paid") lands on the final level.
pub fn build_users(events: &[EventRecord]) -> Projection<UserRow> {
    let candidates: Vec<&EventRecord> = events
        .iter()
        .filter(|e| e.user_id.as_deref().is_some_and(|id| !id.is_empty()))
        .collect();
    let dropped = events.len() - candidates.len();
    let (kept, _) = dedup_by_key_latest(
        candidates,
        |e| e.user_id.clone(),
        |e| e.ts.unwrap_or(i64::MIN),
    );
    let rows = kept
        .into_iter()
        .filter_map(|e| {
            e.user_id.clone().map(|user_id| UserRow {
                user_id,
                first_name: e.first_name.clone(),
                last_name: e.last_name.clone(),
                gender: e.gender.clone(),
                level: e.level.clone(),
            })
        })
        .collect();
    Projection {
        rows,
        missing_key: dropped,
    }
}

/// Builds the `time` dimension: one row per distinct timestamp in the log
/// stream, ascending. Timestamps outside the valid epoch domain are
/// skipped and counted.
pub fn build_time(events: &[EventRecord]) -> (Vec<TimeParts>, usize) {
    let distinct: BTreeSet<i64> = events.iter().filter_map(|e| e.ts).collect();
    let mut rows = Vec::with_capacity(distinct.len());
    let mut invalid = 0usize;
    for ts in distinct {
        match timeparts::derive(ts) {
            Ok(parts) => rows.push(parts),
            Err(e) => {
                invalid += 1;
                debug!("Skipping time row: {}", e);
            }
        }
    }
    (rows, invalid)
}
