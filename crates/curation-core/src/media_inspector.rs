//! Media Inspector. Decodes container metadata, EXIF, duration, dimensions,
//! audio presence; classifies image vs. video; computes MIME.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{instrument, trace, warn};

use crate::error::InspectError;
use crate::media::{classify_extension, GpsCoordinates, ImageMetadata, MediaFile, MediaKind, MediaMetadata, MediaSource, VideoMetadata};

/// Metadata extracted here is authoritative; downstream prompts must treat
/// it as ground truth and must not re-derive it from pixels.
#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
pub async fn inspect(path: impl AsRef<Path>) -> Result<MediaFile, InspectError> {
    let path = path.as_ref();

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    let kind = classify_extension(ext)
        .ok_or_else(|| InspectError::UnsupportedFormat(ext.to_string()))?;

    let file_meta = tokio::fs::metadata(path).await.map_err(|source| InspectError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let size = file_meta.len();
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();

    let metadata = match kind {
        MediaKind::Image => MediaMetadata::Image(inspect_image(path)?),
        MediaKind::Video => MediaMetadata::Video(inspect_video(path).await?),
    };

    trace!(?kind, size, "inspected media file");

    Ok(MediaFile {
        source: MediaSource::Local(path.to_path_buf()),
        mime,
        size,
        metadata,
    })
}

fn inspect_image(path: &Path) -> Result<ImageMetadata, InspectError> {
    let dims = image::image_dimensions(path).map_err(|e| InspectError::DecodeFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut meta = ImageMetadata {
        width: dims.0,
        height: dims.1,
        orientation: 1,
        ..Default::default()
    };

    if let Ok(file) = std::fs::File::open(path) {
        let mut buf_reader = std::io::BufReader::new(file);
        if let Ok(exif) = exif::Reader::new().read_from_container(&mut buf_reader) {
            if let Some(field) = exif.get_field(exif::Tag::Make, exif::In::PRIMARY) {
                meta.camera_make = Some(field.display_value().to_string());
            }
            if let Some(field) = exif.get_field(exif::Tag::Model, exif::In::PRIMARY) {
                meta.camera_model = Some(field.display_value().to_string());
            }
            if let Some(field) = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
                if let Some(v) = field.value.get_uint(0) {
                    meta.orientation = v as u16;
                }
            }
            if let Some(field) = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY) {
                meta.captured_at = parse_exif_datetime(&field.display_value().to_string());
            }
            meta.gps = extract_gps(&exif);
        }
    }

    Ok(meta)
}

fn extract_gps(exif: &exif::Exif) -> Option<GpsCoordinates> {
    let lat_field = exif.get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY)?;
    let lat_ref = exif.get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY)?;
    let lon_field = exif.get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY)?;
    let lon_ref = exif.get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY)?;

    let lat = dms_to_decimal(&lat_field.value)?;
    let lon = dms_to_decimal(&lon_field.value)?;

    let lat = if lat_ref.display_value().to_string().starts_with('S') {
        -lat
    } else {
        lat
    };
    let lon = if lon_ref.display_value().to_string().starts_with('W') {
        -lon
    } else {
        lon
    };

    Some(GpsCoordinates { lat, lon })
}

fn dms_to_decimal(value: &exif::Value) -> Option<f64> {
    if let exif::Value::Rational(rationals) = value {
        if rationals.len() == 3 {
            let deg = rationals[0].to_f64();
            let min = rationals[1].to_f64();
            let sec = rationals[2].to_f64();
            return Some(deg + min / 60.0 + sec / 3600.0);
        }
    }
    None
}

fn parse_exif_datetime(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    tags: Option<std::collections::HashMap<String, String>>,
}

async fn inspect_video(path: &Path) -> Result<VideoMetadata, InspectError> {
    if which::which("ffprobe").is_err() {
        return Err(InspectError::DecodeFailed {
            path: path.display().to_string(),
            reason: "ffprobe not found on PATH".to_string(),
        });
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| InspectError::DecodeFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(InspectError::DecodeFailed {
            path: path.display().to_string(),
            reason: format!("ffprobe exited with {}", output.status),
        });
    }

    let parsed: FfprobeOutput =
        serde_json::from_slice(&output.stdout).map_err(|e| InspectError::DecodeFailed {
            path: path.display().to_string(),
            reason: format!("failed to parse ffprobe output: {e}"),
        })?;

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| InspectError::DecodeFailed {
            path: path.display().to_string(),
            reason: "no video stream found".to_string(),
        })?;

    let audio_codec = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .and_then(|s| s.codec_name.clone());

    if audio_codec.is_none() {
        warn!("video has no audio stream");
    }

    Ok(VideoMetadata {
        duration_secs: parsed
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        frame_rate: video_stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .unwrap_or(0.0),
        video_codec: video_stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        audio_codec,
        bitrate_bps: parsed
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.parse().ok())
            .unwrap_or(0),
        captured_at: parsed
            .format
            .tags
            .as_ref()
            .and_then(|tags| tags.get("creation_time"))
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc)),
    })
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_extension() {
        assert!(classify_extension("txt").is_none());
        assert!(classify_extension("JPG").is_some());
        assert!(classify_extension("mkv").is_some());
    }

    #[test]
    fn frame_rate_parses_fraction() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("30/0"), None);
    }

    #[tokio::test]
    async fn unsupported_format_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let err = inspect(&path).await.unwrap_err();
        assert!(matches!(err, InspectError::UnsupportedFormat(_)));
    }
}
