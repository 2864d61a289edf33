//! Per-session stream options

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Geometry code for 1080p
pub const FRAME_SIZE_1080P: i32 = 0;
/// Geometry code for 360p
pub const FRAME_SIZE_360P: i32 = 1;

pub const BITRATE_HD: u8 = 120;
pub const BITRATE_SD: u8 = 60;

/// Options binding one account + one camera to a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionOptions {
    /// Preferred geometry code
    pub frame_size: i32,
    /// Preferred bitrate, in the camera's own units
    pub bitrate: u8,
    pub frame_rate: u8,
    pub connect_timeout: Duration,
    pub enable_audio: bool,
    pub substream: bool,
    /// Skip pacing entirely; may spike CPU
    pub low_latency: bool,
    /// Accepted alternate geometry code; defaults to a model-family quirk,
    /// see [`SessionOptions::alternate_frame_size`]
    pub alt_frame_size: Option<i32>,
    /// Transport-level resend, disabled automatically for battery models
    pub resend: bool,
    /// Directory where the output pipes are created
    pub pipe_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            frame_size: FRAME_SIZE_1080P,
            bitrate: BITRATE_HD,
            frame_rate: 15,
            connect_timeout: Duration::from_secs(20),
            enable_audio: true,
            substream: false,
            low_latency: false,
            alt_frame_size: None,
            resend: true,
            pipe_dir: PathBuf::from("/tmp"),
        }
    }
}

impl SessionOptions {
    /// Defaults with the environment overrides applied: `LOW_LATENCY`
    /// disables pacing, `IGNORE_RES` pins the alternate geometry code,
    /// `RESEND=0` turns transport resend off.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.low_latency = std::env::var("LOW_LATENCY").is_ok_and(|v| !v.is_empty());
        options.alt_frame_size = std::env::var("IGNORE_RES")
            .ok()
            .and_then(|v| v.parse().ok());
        if let Ok(v) = std::env::var("RESEND") {
            options.resend = v.trim() != "0";
        }
        options
    }

    /// Target frame period derived from the preferred frame rate
    pub fn frame_period(&self) -> f64 {
        1.0 / self.frame_rate.max(1) as f64
    }

    /// Alternate geometry code some firmware answers with instead of the
    /// preferred one (doorbells report preferred+1, older models
    /// preferred+3). Camera-specific heuristic, overridable via
    /// `alt_frame_size`.
    pub fn alternate_frame_size(&self) -> i32 {
        self.alt_frame_size.unwrap_or(if self.frame_size >= 3 {
            self.frame_size + 1
        } else {
            self.frame_size + 3
        })
    }

    /// The accepted set of geometry codes for incoming frames
    pub fn valid_frame_sizes(&self) -> [i32; 2] {
        [self.frame_size, self.alternate_frame_size()]
    }
}

/// Human-readable label for a geometry code
pub fn resolution_label(frame_size: i32) -> String {
    match frame_size {
        0 => "HD".into(),
        1 | 4 => "SD".into(),
        3 | 5 => "2K".into(),
        other => other.to_string(),
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
