//! Wire codec helpers.
//!
//! File content rides inside JSON as standard base64. Timestamps travel as
//! fractional seconds since the Unix epoch (`f64`), which keeps well below
//! microsecond error for any realistic date.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FsError, FsResult};

/// Encode raw bytes for the wire.
pub fn encode_bytes(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode wire bytes. Malformed input is an error, never a silent truncation.
pub fn decode_bytes(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// Serde adapter for `Vec<u8>` fields carried as base64 strings.
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_bytes(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode_bytes(&text)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 data: {e}")))
    }
}

/// Convert a `SystemTime` to wire seconds. Times before the epoch go negative.
pub fn system_time_to_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Convert wire seconds back to a `SystemTime`.
///
/// Rounds to the nearest microsecond so values survive the `f64` trip
/// without drifting a nanosecond below what was sent. Values the host
/// clock can't represent are `InvalidArgument`.
pub fn secs_to_system_time(secs: f64) -> FsResult<SystemTime> {
    let out_of_range = || FsError::invalid_argument(format!("timestamp out of range: {secs}"));

    let micros = (secs.abs() * 1_000_000.0).round();
    if !micros.is_finite() || micros >= u64::MAX as f64 {
        return Err(out_of_range());
    }
    let offset = Duration::from_micros(micros as u64);
    let time = if secs >= 0.0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    };
    time.ok_or_else(out_of_range)
}

/// Serialize a request or response body.
pub fn to_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Deserialize a request or response body.
pub fn from_json<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(body)
}
