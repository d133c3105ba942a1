//! Start/end offsets for the clip jobs.
//!
//! Accepts `HH:MM:SS`, `MM:SS` or plain seconds, each with optional
//! fractional seconds. Only the normalized form is ever handed to the engine.

use thiserror::Error;

/// Longest offset accepted, 24 hours.
pub const MAX_TIMESTAMP_SECS: f64 = 86_400.0;

#[derive(Debug, Error, PartialEq)]
pub enum RangeError {
    #[error("timestamp is empty")]
    Empty,

    #[error("invalid timestamp: {0:?}")]
    InvalidFormat(String),

    #[error("timestamp {0:?} is past the 24 hour limit")]
    OutOfRange(String),

    #[error("end time ({end}) must be after start time ({start})")]
    NotIncreasing { start: String, end: String },
}

/// Parses a timestamp into seconds.
pub fn parse_timestamp(ts: &str) -> Result<f64, RangeError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(RangeError::Empty);
    }

    let invalid = || RangeError::InvalidFormat(ts.to_string());

    let parts: Vec<&str> = ts.split(':').collect();
    if parts.len() > 3 {
        return Err(invalid());
    }

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        // Leading components are whole numbers, only the seconds may carry a fraction.
        let well_formed = !part.is_empty()
            && part.chars().all(|c| c.is_ascii_digit() || (last && c == '.'))
            && part.matches('.').count() <= 1
            && !part.starts_with('.')
            && !part.ends_with('.');
        if !well_formed {
            return Err(invalid());
        }

        let value: f64 = part.parse().map_err(|_| invalid())?;
        if i > 0 && value >= 60.0 {
            return Err(invalid());
        }
        total = total * 60.0 + value;
    }

    if !total.is_finite() {
        return Err(invalid());
    }
    if total > MAX_TIMESTAMP_SECS {
        return Err(RangeError::OutOfRange(ts.to_string()));
    }
    Ok(total)
}

/// Formats seconds as `HH:MM:SS.mmm`.
pub fn format_timestamp(total_secs: f64) -> String {
    let millis = (total_secs * 1000.0).round() as u64;
    let hours = millis / 3_600_000;
    let mins = (millis / 60_000) % 60;
    let secs = (millis / 1000) % 60;
    let frac = millis % 1000;
    format!("{hours:02}:{mins:02}:{secs:02}.{frac:03}")
}

/// A validated `[start, end)` window within the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRange {
    start_secs: f64,
    end_secs: f64,
}

impl ClipRange {
    pub fn parse(start: &str, end: &str) -> Result<Self, RangeError> {
        let start_secs = parse_timestamp(start)?;
        let end_secs = parse_timestamp(end)?;
        Self::from_secs(start_secs, end_secs).ok_or_else(|| RangeError::NotIncreasing {
            start: start.trim().to_string(),
            end: end.trim().to_string(),
        })
    }

    pub fn from_secs(start_secs: f64, end_secs: f64) -> Option<Self> {
        let ordered = start_secs >= 0.0 && end_secs > start_secs;
        (ordered && end_secs <= MAX_TIMESTAMP_SECS).then_some(Self {
            start_secs,
            end_secs,
        })
    }

    pub fn start(&self) -> String {
        format_timestamp(self.start_secs)
    }

    pub fn end(&self) -> String {
        format_timestamp(self.end_secs)
    }
}
