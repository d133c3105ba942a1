//! Frame sampling policy for the `/frames` job.
//!
//! The requested duration decides how many stills are pulled out of the
//! upload and how far apart they are. Longer sources get a slower sampling
//! rate so output size and transcode cost stay bounded.

use std::fmt;

use thiserror::Error;

/// Frames are never extracted past this count for sources longer than
/// [`FULL_SAMPLING_LIMIT_SECS`].
pub const MAX_EXTRACT_COUNT: u32 = 9;

/// Sources up to this many whole seconds get one frame per second.
pub const FULL_SAMPLING_LIMIT_SECS: u32 = 10;

/// First whole-second duration with no sampling bracket.
pub const UNSUPPORTED_FROM_SECS: u32 = 65;

/// Ascending `(upper bound, inclusive, rate)` brackets, first match wins.
const BRACKETS: &[(u32, bool, FrameRate)] = &[
    (10, true, FrameRate::new(1, 1)),
    (15, true, FrameRate::new(1, 1)),
    (20, false, FrameRate::new(2, 3)),
    (30, false, FrameRate::new(1, 2)),
    (40, false, FrameRate::new(2, 5)),
    (45, false, FrameRate::new(1, 3)),
    (50, false, FrameRate::new(2, 7)),
    (55, false, FrameRate::new(1, 4)),
    (60, false, FrameRate::new(2, 9)),
    (65, false, FrameRate::new(1, 5)),
];

#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    #[error("duration must be a finite number of seconds, got {0}")]
    NotFinite(f64),

    #[error("duration must be at least 1 second, got {0}")]
    TooShort(f64),

    #[error("duration of {0} seconds is not supported (must be under 65)")]
    TooLong(u32),
}

/// Exact sampling rate in frames per second, kept as a fraction so the
/// engine sees `2/3` rather than a rounded decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    num: u32,
    den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_hz(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Video filter expression understood by ffmpeg's `-vf`.
    pub fn filter(&self) -> String {
        format!("fps={self}")
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Parameters of one frame-extraction job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub extract_count: u32,
    pub rate: FrameRate,
}

/// Maps a requested duration onto the number of frames to read back and the
/// rate to sample at. Only the whole-second floor of `duration_secs` counts.
pub fn compute_sampling(duration_secs: f64) -> Result<Sampling, SamplingError> {
    if !duration_secs.is_finite() {
        return Err(SamplingError::NotFinite(duration_secs));
    }
    if duration_secs < 1.0 {
        return Err(SamplingError::TooShort(duration_secs));
    }

    let whole = if duration_secs >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        duration_secs.floor() as u32
    };

    let rate = BRACKETS
        .iter()
        .find(|(bound, inclusive, _)| {
            if *inclusive {
                whole <= *bound
            } else {
                whole < *bound
            }
        })
        .map(|(_, _, rate)| *rate)
        .ok_or(SamplingError::TooLong(whole))?;

    let extract_count = if whole <= FULL_SAMPLING_LIMIT_SECS {
        whole
    } else {
        MAX_EXTRACT_COUNT
    };

    Ok(Sampling {
        extract_count,
        rate,
    })
}
