use serde_json::Value;

use crate::error::EtlError;

/// One record from the track catalog. Every field is schema-on-read
/// optional; downstream projections decide what a missing field means.
#[derive(Debug, Clone, Default)]
pub struct SongRecord {
    pub song_id: Option<String>,
    pub title: Option<String>,
    pub artist_id: Option<String>,
    pub artist_name: Option<String>,
    pub artist_location: Option<String>,
    pub artist_latitude: Option<f64>,
    pub artist_longitude: Option<f64>,
    pub duration: Option<f64>,
    pub num_songs: Option<i32>,
    pub year: Option<i32>,
}

/// One event from the activity log.
#[derive(Debug, Clone, Default)]
pub struct EventRecord {
    pub user_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
    pub page: Option<String>,
    pub session_id: Option<i64>,
    pub location: Option<String>,
    pub user_agent: Option<String>,
    pub ts: Option<i64>,
    pub song: Option<String>,
    pub artist: Option<String>,
}

impl SongRecord {
    /// Coerces a parsed JSON value against the catalog schema. Undeclared
    /// fields are ignored; declared-but-absent fields become `None`; a
    /// present field of the wrong type fails the whole record so the caller
    /// can skip and count it.
    pub fn from_value(value: &Value) -> Result<Self, EtlError> {
        Ok(SongRecord {
            song_id: opt_string(value, "song_id")?,
            title: opt_string(value, "title")?,
            artist_id: opt_string(value, "artist_id")?,
            artist_name: opt_string(value, "artist_name")?,
            artist_location: opt_string(value, "artist_location")?,
            artist_latitude: opt_f64(value, "artist_latitude")?,
            artist_longitude: opt_f64(value, "artist_longitude")?,
            duration: opt_f64(value, "duration")?,
            num_songs: opt_i32(value, "num_songs")?,
            year: opt_i32(value, "year")?,
        })
    }

    pub fn fingerprint(&self) -> SongFingerprint {
        SongFingerprint {
            song_id: self.song_id.clone(),
            title: self.title.clone(),
            artist_id: self.artist_id.clone(),
            artist_name: self.artist_name.clone(),
            artist_location: self.artist_location.clone(),
            artist_latitude: self.artist_latitude.map(f64::to_bits),
            artist_longitude: self.artist_longitude.map(f64::to_bits),
            duration: self.duration.map(f64::to_bits),
            num_songs: self.num_songs,
            year: self.year,
        }
    }
}

impl EventRecord {
    pub fn from_value(value: &Value) -> Result<Self, EtlError> {
        Ok(EventRecord {
            user_id: opt_string(value, "userId")?,
            first_name: opt_string(value, "firstName")?,
            last_name: opt_string(value, "lastName")?,
            gender: opt_string(value, "gender")?,
            level: opt_string(value, "level")?,
            page: opt_string(value, "page")?,
            session_id: opt_i64(value, "sessionId")?,
            location: opt_string(value, "location")?,
            user_agent: opt_string(value, "userAgent")?,
            ts: opt_i64(value, "ts")?,
            song: opt_string(value, "song")?,
            artist: opt_string(value, "artist")?,
        })
    }

    pub fn fingerprint(&self) -> EventFingerprint {
        EventFingerprint {
            user_id: self.user_id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            gender: self.gender.clone(),
            level: self.level.clone(),
            page: self.page.clone(),
            session_id: self.session_id,
            location: self.location.clone(),
            user_agent: self.user_agent.clone(),
            ts: self.ts,
            song: self.song.clone(),
            artist: self.artist.clone(),
        }
    }
}

/// Hashable identity of a catalog record. Floats are compared by bit
/// pattern so exact duplicates collapse and a NaN field never makes a
/// record un-deduplicable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SongFingerprint {
    song_id: Option<String>,
    title: Option<String>,
    artist_id: Option<String>,
    artist_name: Option<String>,
    artist_location: Option<String>,
    artist_latitude: Option<u64>,
    artist_longitude: Option<u64>,
    duration: Option<u64>,
    num_songs: Option<i32>,
    year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFingerprint {
    user_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    gender: Option<String>,
    level: Option<String>,
    page: Option<String>,
    session_id: Option<i64>,
    location: Option<String>,
    user_agent: Option<String>,
    ts: Option<i64>,
    song: Option<String>,
    artist: Option<String>,
}

fn malformed(field: &'static str, expected: &'static str, value: &Value) -> EtlError {
    EtlError::MalformedRecord {
        field,
        expected,
        found: value.to_string(),
    }
}

/// String-typed field. JSON numbers are accepted and formatted (activity
/// logs emit numeric userId/sessionId for some clients); other types fail.
fn opt_string(value: &Value, field: &'static str) -> Result<Option<String>, EtlError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v @ Value::Number(_)) => Ok(Some(v.to_string())),
        Some(v) => Err(malformed(field, "string", v)),
    }
}

fn opt_f64(value: &Value, field: &'static str) -> Result<Option<f64>, EtlError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| malformed(field, "double", &value[field])),
        Some(v) => Err(malformed(field, "double", v)),
    }
}

fn opt_i64(value: &Value, field: &'static str) -> Result<Option<i64>, EtlError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| malformed(field, "integer", &value[field])),
        Some(v) => Err(malformed(field, "integer", v)),
    }
}

fn opt_i32(value: &Value, field: &'static str) -> Result<Option<i32>, EtlError> {
    match opt_i64(value, field)? {
        None => Ok(None),
        Some(n) => i32::try_from(n)
            .map(Some)
            .map_err(|_| malformed(field, "integer", &value[field])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn song_record_reads_declared_fields_and_ignores_extras() {
        let raw = json!({
            "song_id": "S1",
            "title": "Test Song",
            "artist_id": "A1",
            "artist_name": "Test Artist",
            "duration": 200.0,
            "year": 2000,
            "some_undeclared_field": {"ignored": true}
        });
        let rec = SongRecord::from_value(&raw).unwrap();
        assert_eq!(rec.song_id.as_deref(), Some("S1"));
        assert_eq!(rec.duration, Some(200.0));
        assert_eq!(rec.year, Some(2000));
        assert_eq!(rec.artist_location, None);
        assert_eq!(rec.num_songs, None);
    }

    #[test]
    fn absent_and_null_fields_become_none() {
        let rec = SongRecord::from_value(&json!({"song_id": null})).unwrap();
        assert_eq!(rec.song_id, None);
        assert_eq!(rec.title, None);
    }

    #[test]
    fn type_mismatch_fails_the_record() {
        let err = SongRecord::from_value(&json!({"duration": "not a number"})).unwrap_err();
        assert!(matches!(
            err,
            EtlError::MalformedRecord { field: "duration", .. }
        ));

        let err = EventRecord::from_value(&json!({"ts": 1.5})).unwrap_err();
        assert!(matches!(err, EtlError::MalformedRecord { field: "ts", .. }));
    }

    #[test]
    fn numeric_user_id_coerces_to_string() {
        let rec = EventRecord::from_value(&json!({"userId": 42, "ts": 946684800000i64})).unwrap();
        assert_eq!(rec.user_id.as_deref(), Some("42"));
        assert_eq!(rec.ts, Some(946684800000));
    }

    #[test]
    fn fingerprints_collapse_exact_duplicates_only() {
        let a = SongRecord::from_value(&json!({"song_id": "S1", "duration": 200.0})).unwrap();
        let b = SongRecord::from_value(&json!({"song_id": "S1", "duration": 200.0})).unwrap();
        let c = SongRecord::from_value(&json!({"song_id": "S1", "duration": 200.5})).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
