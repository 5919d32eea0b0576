//! JPEG frame naming, listing, and reading conventions, plus the sentinel
//! image returned by `pic` when a frame is missing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use sentinelcam_types::EventId;

use crate::StorageError;

/// A minimal valid baseline JPEG encoding a single black pixel, returned by
/// the `pic` query when the requested frame does not exist on disk.
pub const SENTINEL_JPEG: &[u8] = &[
    0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, 0x4a, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
    0x00, 0x01, 0x00, 0x00, 0xff, 0xdb, 0x00, 0x43, 0x00, 0x03, 0x02, 0x02, 0x02, 0x02, 0x02, 0x03,
    0x02, 0x02, 0x02, 0x03, 0x03, 0x03, 0x03, 0x04, 0x06, 0x04, 0x04, 0x04, 0x04, 0x04, 0x08, 0x06,
    0x06, 0x05, 0x06, 0x09, 0x08, 0x0a, 0x0a, 0x09, 0x08, 0x09, 0x09, 0x0a, 0x0c, 0x0f, 0x0c, 0x0a,
    0x0b, 0x0e, 0x0b, 0x09, 0x09, 0x0d, 0x11, 0x0d, 0x0e, 0x0f, 0x10, 0x10, 0x11, 0x10, 0x0a, 0x0c,
    0x12, 0x13, 0x12, 0x10, 0x13, 0x0f, 0x10, 0x10, 0x10, 0xff, 0xdb, 0x00, 0x43, 0x01, 0x03, 0x03,
    0x03, 0x04, 0x03, 0x04, 0x08, 0x04, 0x04, 0x08, 0x10, 0x0b, 0x09, 0x0b, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0xff, 0xc0,
    0x00, 0x11, 0x08, 0x00, 0x01, 0x00, 0x01, 0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11,
    0x01, 0xff, 0xc4, 0x00, 0x15, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0xff, 0xc4, 0x00, 0x14, 0x10, 0x01, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xc4,
    0x00, 0x15, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x05, 0xff, 0xc4, 0x00, 0x14, 0x11, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xda, 0x00, 0x0c, 0x03,
    0x01, 0x00, 0x02, 0x11, 0x03, 0x11, 0x00, 0x3f, 0x00, 0x9d, 0x00, 0x19, 0x97, 0xff, 0xd9,
];

const FRAMETIME_FMT: &str = "%Y-%m-%d_%H.%M.%S%.6f";

/// Format a timestamp as the `YYYY-MM-DD_HH.MM.SS.ffffff` string used as the
/// `frametime` parameter of the `pic` query.
pub fn format_frametime(ts: DateTime<Utc>) -> String {
    ts.format(FRAMETIME_FMT).to_string()
}

pub fn parse_frametime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, FRAMETIME_FMT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Filename for a single captured frame:
/// `{event_id}_{YYYY-MM-DD}_{HH.MM.SS.ffffff}.jpg`.
pub fn frame_filename(event_id: &EventId, date: &str, ts: DateTime<Utc>) -> String {
    format!(
        "{event_id}_{date}_{}.jpg",
        ts.format("%H.%M.%S%.6f")
    )
}

pub fn frame_path(img_root: &Path, date: &str, event_id: &EventId, ts: DateTime<Utc>) -> PathBuf {
    img_root.join(date).join(frame_filename(event_id, date, ts))
}

/// List the timestamps of every captured frame for an event, in
/// chronological order, by scanning the image date folder for files with
/// the `{event_id}_` filename prefix.
pub fn list_event_frames(
    img_root: &Path,
    date: &str,
    event_id: &EventId,
) -> Result<Vec<DateTime<Utc>>, StorageError> {
    let dir = img_root.join(date);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let prefix = format!("{event_id}_{date}_");
    let mut timestamps = Vec::new();
    let entries = std::fs::read_dir(&dir).map_err(|source| StorageError::Io {
        path: dir.clone(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stripped) = name.strip_prefix(&prefix) else { continue };
        let Some(time_part) = stripped.strip_suffix(".jpg") else { continue };
        let Some(ts) = parse_frametime(&format!("{date}_{time_part}")) else { continue };
        timestamps.push(ts);
    }
    timestamps.sort_unstable();
    Ok(timestamps)
}

pub fn read_jpeg(path: &Path) -> Result<Vec<u8>, StorageError> {
    std::fs::read(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn frametime_round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 30, 12, 34, 56).unwrap()
            + chrono::Duration::microseconds(789012);
        let s = format_frametime(ts);
        assert_eq!(s, "2026-07-30_12.34.56.789012");
        assert_eq!(parse_frametime(&s).unwrap(), ts);
    }

    #[test]
    fn list_event_frames_sorted_and_filtered_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let date_dir = tmp.path().join("2026-07-30");
        std::fs::create_dir_all(&date_dir).unwrap();
        let event_id = EventId::new("E1").unwrap();
        let ts1 = Utc.with_ymd_and_hms(2026, 7, 30, 1, 0, 0).unwrap();
        let ts2 = Utc.with_ymd_and_hms(2026, 7, 30, 2, 0, 0).unwrap();
        std::fs::write(date_dir.join(frame_filename(&event_id, "2026-07-30", ts2)), b"").unwrap();
        std::fs::write(date_dir.join(frame_filename(&event_id, "2026-07-30", ts1)), b"").unwrap();
        std::fs::write(
            date_dir.join(frame_filename(&EventId::new("E2").unwrap(), "2026-07-30", ts1)),
            b"",
        )
        .unwrap();

        let frames = list_event_frames(tmp.path(), "2026-07-30", &event_id).unwrap();
        assert_eq!(frames, vec![ts1, ts2]);
    }

    #[test]
    fn missing_frame_returns_sentinel() {
        assert_eq!(SENTINEL_JPEG[0], 0xff);
        assert_eq!(SENTINEL_JPEG[1], 0xd8);
    }
}
