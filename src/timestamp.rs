//! Timestamp recovery for a clip.
//!
//! Strategies are tried in priority order and each one contains its own
//! failures: burned-in overlay text first, then the file's modification
//! time, then the wall clock. The chain always yields a value.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use trailscout_detect::ocr::Ocr;
use trailscout_detect::stamp;
use trailscout_detect::utils::{self, RelRect};
use trailscout_io::VideoSource;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

// Trail cameras burn the overlay into the bottom strip on almost every
// model; a few put it along the top instead. Restricting OCR to those strips
// also keeps it from chewing on grass and branches.
const BOTTOM_STRIP: RelRect = RelRect::new(0.0, 0.8, 1.0, 0.2);
const TOP_STRIP: RelRect = RelRect::new(0.0, 0.0, 1.0, 0.1);

/// Which strategy produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Ocr,
    FileMetadata,
    WallClock,
}

impl core::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Provenance::Ocr => "ocr",
            Provenance::FileMetadata => "file-metadata",
            Provenance::WallClock => "wall-clock",
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TimestampResult {
    pub date: String,
    pub time: String,
    pub provenance: Provenance,
}

/// Recovers the clip's date and time. Never fails: the wall clock is the
/// strategy of last resort.
pub fn get_timestamp(path: &Path, ocr: Option<&Ocr>) -> TimestampResult {
    from_burned_in_text(path, ocr)
        .or_else(|| from_mtime(path))
        .unwrap_or_else(from_wall_clock)
}

/// Strategy 1: read the overlay the camera burned into the first frame.
fn from_burned_in_text(path: &Path, ocr: Option<&Ocr>) -> Option<TimestampResult> {
    let ocr = ocr?;
    let text = match read_overlay_text(path, ocr) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("overlay OCR failed for {}: {e}", path.display());
            return None;
        }
    };
    tracing::debug!("overlay text for {}: {text}", path.display());
    let (date, time) = stamp::scan_timestamp(&text)?;
    Some(TimestampResult {
        date,
        time,
        provenance: Provenance::Ocr,
    })
}

fn read_overlay_text(path: &Path, ocr: &Ocr) -> anyhow::Result<String> {
    let mut source = VideoSource::open(path)?;
    let frame = source
        .next_frame()?
        .ok_or_else(|| anyhow::anyhow!("{} has no frames", path.display()))?;

    // Bottom strip first so its text leads the concatenation.
    let mut lines = ocr.read_text(&utils::extract_roi(&frame.mat, BOTTOM_STRIP)?)?;
    lines.extend(ocr.read_text(&utils::extract_roi(&frame.mat, TOP_STRIP)?)?);
    Ok(lines.join(" "))
}

/// Strategy 2: the file's modification time, local time zone.
fn from_mtime(path: &Path) -> Option<TimestampResult> {
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(e) => {
            tracing::debug!("no usable mtime for {}: {e}", path.display());
            return None;
        }
    };
    let local: DateTime<Local> = modified.into();
    Some(TimestampResult {
        date: local.format(DATE_FORMAT).to_string(),
        time: local.format(TIME_FORMAT).to_string(),
        provenance: Provenance::FileMetadata,
    })
}

/// Strategy 3: now. Cannot fail.
fn from_wall_clock() -> TimestampResult {
    let now = Local::now();
    TimestampResult {
        date: now.format(DATE_FORMAT).to_string(),
        time: now.format(TIME_FORMAT).to_string(),
        provenance: Provenance::WallClock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn mtime_fallback_formats_local_time() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let epoch = 1_710_160_522_i64;
        filetime::set_file_mtime(
            file.path(),
            filetime::FileTime::from_unix_time(epoch, 0),
        )
        .unwrap();

        let result = get_timestamp(file.path(), None);

        let expected: DateTime<Local> =
            (UNIX_EPOCH + Duration::from_secs(epoch as u64)).into();
        assert_eq!(result.provenance, Provenance::FileMetadata);
        assert_eq!(result.date, expected.format(DATE_FORMAT).to_string());
        assert_eq!(result.time, expected.format(TIME_FORMAT).to_string());
    }

    #[test]
    fn unreadable_file_still_yields_a_value() {
        let result = get_timestamp(Path::new("/definitely/not/here.mp4"), None);
        assert_eq!(result.provenance, Provenance::WallClock);
        assert!(!result.date.is_empty());
        assert!(!result.time.is_empty());
    }
}
