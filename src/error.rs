use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the pipeline.
///
/// `MalformedRecord` and `InvalidTimestamp` are recovered locally with
/// skip-and-count; they never abort a run. `WriteFailure` is fatal for the
/// run. A log event with no catalog match is not an error at all; the fact
/// builder counts it and moves on.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("field '{field}' is not coercible to {expected} (found {found})")]
    MalformedRecord {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("epoch timestamp {0} is outside the valid millisecond domain")]
    InvalidTimestamp(i64),

    #[error("failed to write table '{table}' at {}", location.display())]
    WriteFailure {
        table: String,
        location: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}
