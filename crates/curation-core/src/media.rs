//! Shared media types. `MediaFile` is the transient, in-memory bundle — never
//! persisted, built either fresh by the media inspector or reconstructed
//! from a `FileResult` row at batch time.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ACCEPTED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic", "heif", "gif"];
pub const ACCEPTED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

/// Where the bytes for a [`MediaFile`] currently live.
#[derive(Debug, Clone)]
pub enum MediaSource {
    Local(PathBuf),
    Remote {
        key: String,
        presigned_url: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub gps: Option<GpsCoordinates>,
    pub orientation: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub bitrate_bps: u64,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaMetadata {
    Image(ImageMetadata),
    Video(VideoMetadata),
}

impl MediaMetadata {
    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        match self {
            Self::Image(_) => MediaKind::Image,
            Self::Video(_) => MediaKind::Video,
        }
    }

    /// Videos strictly shorter than the configured threshold are flagged
    /// upstream as likely-accidental.
    #[must_use]
    pub fn is_short_video(&self, threshold_secs: f64) -> bool {
        matches!(self, Self::Video(v) if v.duration_secs < threshold_secs)
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub source: MediaSource,
    pub mime: String,
    pub size: u64,
    pub metadata: MediaMetadata,
}

impl MediaFile {
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.metadata.kind()
    }
}

/// Classifies a filename extension into the accepted set, the authoritative
/// ground truth downstream prompts must not re-derive from pixels.
#[must_use]
pub fn classify_extension(ext: &str) -> Option<MediaKind> {
    let ext = ext.to_ascii_lowercase();
    if ACCEPTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if ACCEPTED_VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}
