//! Deletion of all persisted artifacts for one event: the index row(s),
//! every tracking CSV, and every JPEG frame. Idempotent — run twice, the
//! second run finds nothing left to remove.

use std::path::Path;

use sentinelcam_types::EventId;

use crate::{date_index, StorageError, StorageRoots};

pub fn purge_event(roots: &StorageRoots, date: &str, event_id: &EventId) -> Result<(), StorageError> {
    let index_path = roots.index_path(date);
    date_index::remove_event_rows(&index_path, event_id)?;
    remove_tracking_files(&roots.date_csv_dir(date), event_id)?;
    remove_image_files(&roots.date_img_dir(date), event_id)?;
    Ok(())
}

fn remove_tracking_files(dir: &Path, event_id: &EventId) -> Result<(), StorageError> {
    if !dir.exists() {
        return Ok(());
    }
    let prefix = format!("{event_id}_");
    for entry in walkdir::WalkDir::new(dir).max_depth(1).into_iter().flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".csv") {
            remove_best_effort(entry.path());
        }
    }
    Ok(())
}

fn remove_image_files(dir: &Path, event_id: &EventId) -> Result<(), StorageError> {
    if !dir.exists() {
        return Ok(());
    }
    let prefix = format!("{event_id}_");
    for entry in walkdir::WalkDir::new(dir).max_depth(1).into_iter().flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".jpg") {
            remove_best_effort(entry.path());
        }
    }
    Ok(())
}

/// A failed removal is logged, not propagated: two concurrent `del`
/// requests for the same event must both succeed even if one of them loses
/// a race to unlink a file the other already removed.
fn remove_best_effort(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file during purge");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{date_index::append_row, tracking_csv::TrackingCsvWriter};
    use chrono::Utc;
    use sentinelcam_types::{CamSize, DateIndexRow, Rect, TrackingRecord, TypeTag};

    #[test]
    fn purge_removes_index_tracking_and_images() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = StorageRoots::new(tmp.path().join("csv"), tmp.path().join("img"));
        let date = "2026-07-30";
        let event_id = EventId::new("E1").unwrap();

        append_row(
            &roots.index_path(date),
            &DateIndexRow {
                node: "n1".into(),
                view: "front".into(),
                timestamp: Utc::now(),
                event_id: event_id.clone(),
                camsize: CamSize { width: 640, height: 360 },
                type_tag: TypeTag::TRK,
            },
        )
        .unwrap();

        let trk_path = roots.tracking_csv_path(date, &event_id, TypeTag::TRK);
        let mut writer = TrackingCsvWriter::create(&trk_path).unwrap();
        writer
            .append(&TrackingRecord {
                timestamp: Utc::now(),
                object_id: 1,
                classname: "person".into(),
                rect: Rect { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
            })
            .unwrap();
        writer.flush().unwrap();
        drop(writer);

        let img_dir = roots.date_img_dir(date);
        std::fs::create_dir_all(&img_dir).unwrap();
        let jpg_path = img_dir.join(format!("{event_id}_{date}_01.00.00.000000.jpg"));
        std::fs::write(&jpg_path, b"fake jpeg").unwrap();

        purge_event(&roots, date, &event_id).unwrap();

        assert!(date_index::read_rows(&roots.index_path(date)).unwrap().is_empty());
        assert!(!trk_path.exists());
        assert!(!jpg_path.exists());

        // Idempotent: second purge on already-clean state is a no-op, not an error.
        purge_event(&roots, date, &event_id).unwrap();
    }
}
