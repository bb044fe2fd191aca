//! Encodes a [`JobRecord`] into the Redis hash representation (§4.1: "one
//! hash per job, numeric fields stored as decimal strings") and back.
//!
//! The full record travels as a single compact JSON blob under the `record`
//! field so no information is lost in round-tripping; a handful of scalar
//! fields are mirrored alongside it so simple introspection (e.g. an
//! external `HGET job:1 attemptsMade`) does not require deserializing the
//! whole blob.

use crate::error::JobError;
use crate::job::JobRecord;
use std::collections::HashMap;

const FIELD_RECORD: &str = "record";
const FIELD_ID: &str = "id";
const FIELD_QUEUE: &str = "queue";
const FIELD_ATTEMPTS_MADE: &str = "attemptsMade";
const FIELD_PROGRESS: &str = "progress";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_DELAY: &str = "delay";

/// Encodes `job` into the field/value pairs to `HSET` onto `job:{id}`.
pub fn encode_job(job: &JobRecord) -> Result<HashMap<String, String>, serde_json::Error> {
    let mut fields = HashMap::with_capacity(6);
    fields.insert(FIELD_RECORD.to_string(), job.to_json()?);
    fields.insert(FIELD_ID.to_string(), job.id.as_str().to_string());
    fields.insert(FIELD_QUEUE.to_string(), job.queue.clone());
    fields.insert(FIELD_ATTEMPTS_MADE.to_string(), job.attempts_made.to_string());
    fields.insert(FIELD_PROGRESS.to_string(), job.progress.to_string());
    fields.insert(FIELD_TIMESTAMP.to_string(), job.timestamp.timestamp_millis().to_string());
    fields.insert(FIELD_DELAY.to_string(), job.delay.to_string());
    Ok(fields)
}

/// Decodes a hash fetched with `HGETALL job:{id}` back into a [`JobRecord`].
/// Only the `record` field is actually consulted; the mirrored scalars exist
/// for external introspection, not as the decode's source of truth.
pub fn decode_job(fields: &HashMap<String, String>) -> Result<JobRecord, DecodeError> {
    let record = fields.get(FIELD_RECORD).ok_or(DecodeError::MissingRecord)?;
    Ok(JobRecord::from_json(record)?)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("hash has no `record` field")]
    MissingRecord,
    #[error("malformed record JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DecodeError> for JobError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::MissingRecord => JobError::NotFound("job hash missing record field".into()),
            DecodeError::Json(err) => JobError::Serialization(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;

    #[test]
    fn encode_then_decode_is_idempotent() {
        let job = JobRecord::new("default", "{\"x\":1}", JobOptions::default());
        let encoded = encode_job(&job).unwrap();
        let decoded = decode_job(&encoded).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.data, job.data);

        // Re-encoding the decoded record must reproduce the same record blob.
        let re_encoded = encode_job(&decoded).unwrap();
        assert_eq!(re_encoded[FIELD_RECORD], encoded[FIELD_RECORD]);
    }

    #[test]
    fn decode_rejects_hash_missing_record_field() {
        let fields = HashMap::new();
        assert!(matches!(decode_job(&fields), Err(DecodeError::MissingRecord)));
    }

    #[test]
    fn numeric_fields_are_stored_as_decimal_strings() {
        let job = JobRecord::new("default", "{}", JobOptions::default());
        let encoded = encode_job(&job).unwrap();
        assert!(encoded[FIELD_ATTEMPTS_MADE].parse::<u32>().is_ok());
        assert!(encoded[FIELD_TIMESTAMP].parse::<i64>().is_ok());
    }
}
