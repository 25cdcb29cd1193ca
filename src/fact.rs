use std::collections::HashMap;

use log::debug;

use crate::records::{EventRecord, SongRecord};
use crate::timeparts;

/// The page value that marks a listening event. Everything else in the log
/// (Home, Login, Logout, ...) is navigation noise for this table.
pub const PLAY_PAGE: &str = "NextSong";

/// Row of the `songplays` fact table.
#[derive(Debug, Clone, PartialEq)]
pub struct SongplayRow {
    pub songplay_id: i64,
    pub start_time: i64,
    pub user_id: Option<String>,
    pub level: Option<String>,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: Option<i64>,
    pub location: Option<String>,
    pub user_agent: Option<String>,
    pub year: i32,
    pub month: i32,
}

/// Counters for the fact build.
#[derive(Debug, Default)]
pub struct FactStats {
    /// Play events whose (song, artist) pair had no catalog match.
    pub join_misses: usize,
    /// Play events with no usable timestamp.
    pub invalid_timestamps: usize,
    /// Play events considered (after the page filter).
    pub plays: usize,
}

/// Builds the fact table from play events and the deduplicated catalog.
///
/// The join is an inner hash join on the natural key
/// (song title, artist name): events that match nothing are dropped and
/// counted as a completeness gap of the catalog, not an error. If the
/// catalog carries several tracks under one (title, artist) pair, each
/// match produces a fact row, as a relational inner join would.
///
/// Surrogate ids are assigned by one global pass: rows sort by instant
/// ascending (ties broken by user, session and track so reruns agree),
/// then number densely from 0. This keeps ids deterministic across runs
/// and shard counts.
pub fn build_songplays(events: &[EventRecord], catalog: &[SongRecord]) -> (Vec<SongplayRow>, FactStats) {
    let mut lookup: HashMap<(&str, &str), Vec<&SongRecord>> = HashMap::new();
    for record in catalog {
        if let (Some(title), Some(artist)) = (record.title.as_deref(), record.artist_name.as_deref()) {
            lookup.entry((title, artist)).or_default().push(record);
        }
    }

    let mut stats = FactStats::default();
    let mut rows: Vec<SongplayRow> = Vec::new();

    for event in events {
        if event.page.as_deref() != Some(PLAY_PAGE) {
            continue;
        }
        stats.plays += 1;

        let ts = match event.ts {
            Some(ts) => ts,
            None => {
                stats.invalid_timestamps += 1;
                continue;
            }
        };
        let parts = match timeparts::derive(ts) {
            Ok(parts) => parts,
            Err(e) => {
                stats.invalid_timestamps += 1;
                debug!("Skipping play event: {}", e);
                continue;
            }
        };

        let key = (
            event.song.as_deref().unwrap_or(""),
            event.artist.as_deref().unwrap_or(""),
        );
        let matches = match lookup.get(&key) {
            Some(matches) => matches,
            None => {
                stats.join_misses += 1;
                continue;
            }
        };

        for track in matches {
            rows.push(SongplayRow {
                songplay_id: 0, // assigned below, after the global sort
                start_time: parts.start_time,
                user_id: event.user_id.clone(),
                level: event.level.clone(),
                song_id: track.song_id.clone(),
                artist_id: track.artist_id.clone(),
                session_id: event.session_id,
                location: event.location.clone(),
                user_agent: event.user_agent.clone(),
                year: parts.year,
                month: parts.month,
            });
        }
    }

    rows.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.user_id.cmp(&b.user_id))
            .then_with(|| a.session_id.cmp(&b.session_id))
            .then_with(|| a.song_id.cmp(&b.song_id))
    });
    for (position, row) in rows.iter_mut().enumerate() {
        row.songplay_id = position as i64;
    }

    (rows, stats)
}
