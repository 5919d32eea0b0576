//! Per-`(event, type)` tracking CSVs: `{event_id}_{type}.csv`, header row
//! `timestamp,object_id,classname,rect_x1,rect_y1,rect_x2,rect_y2`.
//!
//! Column order resolves the source's ambiguity between `x1,x2,y1,y2` and
//! `x1,y1,x2,y2` orderings — see DESIGN.md.

use std::fs::File;
use std::path::{Path, PathBuf};

use csv_eof::EarlyEofOk;
use sentinelcam_types::{Rect, TrackingRecord};

use crate::StorageError;

#[derive(serde::Serialize)]
struct RecordOut {
    timestamp: chrono::DateTime<chrono::Utc>,
    object_id: i64,
    classname: String,
    rect_x1: f64,
    rect_y1: f64,
    rect_x2: f64,
    rect_y2: f64,
}

#[derive(serde::Deserialize)]
struct RecordIn {
    timestamp: chrono::DateTime<chrono::Utc>,
    object_id: i64,
    classname: String,
    rect_x1: f64,
    rect_y1: f64,
    rect_x2: f64,
    rect_y2: f64,
}

/// An open tracking CSV, owned by the single-writer CSV-writer thread of a
/// running service for the lifetime of one `(event, type)` pair.
pub struct TrackingCsvWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl TrackingCsvWriter {
    /// Open `path` for writing, creating parent directories and the header
    /// row. Creating the file is idempotent with respect to the date
    /// folder: an existing file with the same name is truncated, matching
    /// a fresh `start` for the `(event, type)` pair.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            crate::ensure_date_dir(parent)?;
        }
        let file = File::create(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = csv::WriterBuilder::new().has_headers(true).from_writer(file);
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn append(&mut self, record: &TrackingRecord) -> Result<(), StorageError> {
        self.writer
            .serialize(RecordOut {
                timestamp: record.timestamp,
                object_id: record.object_id,
                classname: record.classname.clone(),
                rect_x1: record.rect.x1,
                rect_y1: record.rect.y1,
                rect_x2: record.rect.x2,
                rect_y2: record.rect.y2,
            })
            .map_err(|source| StorageError::Csv {
                path: self.path.clone(),
                source,
            })
    }

    /// Flush to disk. Called once when the owning `(event, type)` is closed
    /// by the CSV writer thread; the file is also flushed on every append
    /// so a process crash loses at most the in-flight record.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush().map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Read a tracking CSV sorted by timestamp ascending, tolerating a
/// truncated trailing line. Returns an empty vector (not an error) if the
/// file does not exist.
pub fn read_records(path: &Path) -> Result<Vec<TrackingRecord>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let mut records = Vec::new();
    for result in reader.deserialize::<RecordIn>().early_eof_ok() {
        let row = result.map_err(|source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        records.push(TrackingRecord {
            timestamp: row.timestamp,
            object_id: row.object_id,
            classname: row.classname,
            rect: Rect {
                x1: row.rect_x1,
                y1: row.rect_y1,
                x2: row.rect_x2,
                y2: row.rect_y2,
            },
        });
    }
    records.sort_by_key(|r| r.timestamp);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn create_append_and_read_back_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("E1_trk.csv");
        let t0 = Utc::now();
        {
            let mut w = TrackingCsvWriter::create(&path).unwrap();
            w.append(&TrackingRecord {
                timestamp: t0 + Duration::seconds(1),
                object_id: 1,
                classname: "person".into(),
                rect: Rect { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
            })
            .unwrap();
            w.append(&TrackingRecord {
                timestamp: t0,
                object_id: 1,
                classname: "person".into(),
                rect: Rect { x1: 1.0, y1: 1.0, x2: 11.0, y2: 11.0 },
            })
            .unwrap();
            w.flush().unwrap();
        }
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].timestamp < records[1].timestamp);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing_trk.csv");
        assert!(read_records(&path).unwrap().is_empty());
    }
}
