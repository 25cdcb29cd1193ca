//! Arrow schemas for the five output tables and the row-to-batch
//! conversions the writer consumes. Column lists and nullability follow
//! the star schema: dimension keys and fact partition columns are
//! non-null, everything else is permissive.

use std::sync::Arc;

use arrow::array::{Float64Array, Int32Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

use crate::dimensions::{ArtistRow, SongRow, UserRow};
use crate::fact::SongplayRow;
use crate::timeparts::TimeParts;

fn utc_millis() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
}

pub fn songs_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("song_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("year", DataType::Int32, true),
        Field::new("duration", DataType::Float64, true),
    ]))
}

pub fn artists_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("artist_id", DataType::Utf8, false),
        Field::new("artist_name", DataType::Utf8, true),
        Field::new("artist_location", DataType::Utf8, true),
        Field::new("artist_latitude", DataType::Float64, true),
        Field::new("artist_longitude", DataType::Float64, true),
    ]))
}

pub fn users_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, false),
        Field::new("first_name", DataType::Utf8, true),
        Field::new("last_name", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
    ]))
}

pub fn time_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("start_time", utc_millis(), false),
        Field::new("hour", DataType::Int32, false),
        Field::new("day", DataType::Int32, false),
        Field::new("week", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        Field::new("year", DataType::Int32, false),
        Field::new("weekday", DataType::Int32, false),
    ]))
}

pub fn songplays_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("songplay_id", DataType::Int64, false),
        Field::new("start_time", utc_millis(), false),
        Field::new("user_id", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("song_id", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("session_id", DataType::Int64, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("user_agent", DataType::Utf8, true),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
    ]))
}

pub fn songs_batch(rows: &[&SongRow]) -> Result<RecordBatch, ArrowError> {
    let song_id = StringArray::from_iter_values(rows.iter().map(|r| r.song_id.as_str()));
    let title: StringArray = rows.iter().map(|r| r.title.as_deref()).collect();
    let artist_id: StringArray = rows.iter().map(|r| r.artist_id.as_deref()).collect();
    let year: Int32Array = rows.iter().map(|r| r.year).collect();
    let duration: Float64Array = rows.iter().map(|r| r.duration).collect();

    RecordBatch::try_new(
        songs_schema(),
        vec![
            Arc::new(song_id),
            Arc::new(title),
            Arc::new(artist_id),
            Arc::new(year),
            Arc::new(duration),
        ],
    )
}

pub fn artists_batch(rows: &[&ArtistRow]) -> Result<RecordBatch, ArrowError> {
    let artist_id = StringArray::from_iter_values(rows.iter().map(|r| r.artist_id.as_str()));
    let artist_name: StringArray = rows.iter().map(|r| r.artist_name.as_deref()).collect();
    let artist_location: StringArray = rows.iter().map(|r| r.artist_location.as_deref()).collect();
    let artist_latitude: Float64Array = rows.iter().map(|r| r.artist_latitude).collect();
    let artist_longitude: Float64Array = rows.iter().map(|r| r.artist_longitude).collect();

    RecordBatch::try_new(
        artists_schema(),
        vec![
            Arc::new(artist_id),
            Arc::new(artist_name),
            Arc::new(artist_location),
            Arc::new(artist_latitude),
            Arc::new(artist_longitude),
        ],
    )
}

pub fn users_batch(rows: &[&UserRow]) -> Result<RecordBatch, ArrowError> {
    let user_id = StringArray::from_iter_values(rows.iter().map(|r| r.user_id.as_str()));
    let first_name: StringArray = rows.iter().map(|r| r.first_name.as_deref()).collect();
    let last_name: StringArray = rows.iter().map(|r| r.last_name.as_deref()).collect();
    let gender: StringArray = rows.iter().map(|r| r.gender.as_deref()).collect();
    let level: StringArray = rows.iter().map(|r| r.level.as_deref()).collect();

    RecordBatch::try_new(
        users_schema(),
        vec![
            Arc::new(user_id),
            Arc::new(first_name),
            Arc::new(last_name),
            Arc::new(gender),
            Arc::new(level),
        ],
    )
}

pub fn time_batch(rows: &[&TimeParts]) -> Result<RecordBatch, ArrowError> {
    let start_time =
        TimestampMillisecondArray::from_iter_values(rows.iter().map(|r| r.start_time))
            .with_timezone("UTC");
    let hour = Int32Array::from_iter_values(rows.iter().map(|r| r.hour));
    let day = Int32Array::from_iter_values(rows.iter().map(|r| r.day));
    let week = Int32Array::from_iter_values(rows.iter().map(|r| r.week));
    let month = Int32Array::from_iter_values(rows.iter().map(|r| r.month));
    let year = Int32Array::from_iter_values(rows.iter().map(|r| r.year));
    let weekday = Int32Array::from_iter_values(rows.iter().map(|r| r.weekday));

    RecordBatch::try_new(
        time_schema(),
        vec![
            Arc::new(start_time),
            Arc::new(hour),
            Arc::new(day),
            Arc::new(week),
            Arc::new(month),
            Arc::new(year),
            Arc::new(weekday),
        ],
    )
}

pub fn songplays_batch(rows: &[&SongplayRow]) -> Result<RecordBatch, ArrowError> {
    let songplay_id = Int64Array::from_iter_values(rows.iter().map(|r| r.songplay_id));
    let start_time =
        TimestampMillisecondArray::from_iter_values(rows.iter().map(|r| r.start_time))
            .with_timezone("UTC");
    let user_id: StringArray = rows.iter().map(|r| r.user_id.as_deref()).collect();
    let level: StringArray = rows.iter().map(|r| r.level.as_deref()).collect();
    let song_id: StringArray = rows.iter().map(|r| r.song_id.as_deref()).collect();
    let artist_id: StringArray = rows.iter().map(|r| r.artist_id.as_deref()).collect();
    let session_id: Int64Array = rows.iter().map(|r| r.session_id).collect();
    let location: StringArray = rows.iter().map(|r| r.location.as_deref()).collect();
    let user_agent: StringArray = rows.iter().map(|r| r.user_agent.as_deref()).collect();
    let year = Int32Array::from_iter_values(rows.iter().map(|r| r.year));
    let month = Int32Array::from_iter_values(rows.iter().map(|r| r.month));

    RecordBatch::try_new(
        songplays_schema(),
        vec![
            Arc::new(songplay_id),
            Arc::new(start_time),
            Arc::new(user_id),
            Arc::new(level),
            Arc::new(song_id),
            Arc::new(artist_id),
            Arc::new(session_id),
            Arc::new(location),
            Arc::new(user_agent),
            Arc::new(year),
            Arc::new(month),
        ],
    )
}
