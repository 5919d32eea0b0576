//! The per-day date index: `<CSV_ROOT>/YYYY-MM-DD/camwatcher.csv`, one
//! append-only, headerless row per `(event, type)` pair.

use std::fs::OpenOptions;
use std::path::Path;

use csv_eof::EarlyEofOk;
use sentinelcam_types::{CamSize, DateIndexRow, EventId, TypeTag};

use crate::StorageError;

#[derive(serde::Serialize)]
struct IndexRowOut<'a> {
    node: &'a str,
    viewname: &'a str,
    timestamp: chrono::DateTime<chrono::Utc>,
    event_id: &'a str,
    width: u32,
    height: u32,
    type_tag: &'a str,
}

#[derive(serde::Deserialize)]
struct IndexRowIn {
    node: String,
    viewname: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    event_id: String,
    width: u32,
    height: u32,
    type_tag: String,
}

/// Append one row to the date index. O(1): opens in append mode and writes
/// a single record, never reading the existing file.
pub fn append_row(index_path: &Path, row: &DateIndexRow) -> Result<(), StorageError> {
    if let Some(parent) = index_path.parent() {
        crate::ensure_date_dir(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(index_path)
        .map_err(|source| StorageError::Io {
            path: index_path.to_path_buf(),
            source,
        })?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .serialize(IndexRowOut {
            node: &row.node,
            viewname: &row.view,
            timestamp: row.timestamp,
            event_id: row.event_id.as_str(),
            width: row.camsize.width,
            height: row.camsize.height,
            type_tag: row.type_tag.as_str(),
        })
        .map_err(|source| StorageError::Csv {
            path: index_path.to_path_buf(),
            source,
        })?;
    writer.flush().map_err(|source| StorageError::Io {
        path: index_path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Read every row of the index, silently skipping a malformed trailing line
/// (the on-disk consequence of a crash mid-append) per the storage
/// invariant that readers tolerate this.
pub fn read_rows(index_path: &Path) -> Result<Vec<DateIndexRow>, StorageError> {
    if !index_path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(index_path)
        .map_err(|source| StorageError::Csv {
            path: index_path.to_path_buf(),
            source,
        })?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<IndexRowIn>().early_eof_ok() {
        let row = result.map_err(|source| StorageError::Csv {
            path: index_path.to_path_buf(),
            source,
        })?;
        let event_id = match EventId::new(row.event_id) {
            Ok(id) => id,
            Err(_) => continue,
        };
        let type_tag = match TypeTag::new(&row.type_tag) {
            Ok(t) => t,
            Err(_) => continue,
        };
        rows.push(DateIndexRow {
            node: row.node,
            view: row.viewname,
            timestamp: row.timestamp,
            event_id,
            camsize: CamSize {
                width: row.width,
                height: row.height,
            },
            type_tag,
        });
    }
    Ok(rows)
}

/// Rows for one event, across all of its type tags, in no particular order.
pub fn rows_for_event(index_path: &Path, event_id: &EventId) -> Result<Vec<DateIndexRow>, StorageError> {
    Ok(read_rows(index_path)?
        .into_iter()
        .filter(|r| &r.event_id == event_id)
        .collect())
}

/// Rewrite the index with every row for `event_id` removed. Used by the
/// background purge worker; the whole file is rewritten atomically via a
/// temp file + rename so a crash mid-purge cannot leave a half-written
/// index.
pub fn remove_event_rows(index_path: &Path, event_id: &EventId) -> Result<(), StorageError> {
    let remaining: Vec<DateIndexRow> = read_rows(index_path)?
        .into_iter()
        .filter(|r| &r.event_id != event_id)
        .collect();

    let tmp_path = index_path.with_extension("csv.tmp");
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|source| StorageError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for row in &remaining {
            writer
                .serialize(IndexRowOut {
                    node: &row.node,
                    viewname: &row.view,
                    timestamp: row.timestamp,
                    event_id: row.event_id.as_str(),
                    width: row.camsize.width,
                    height: row.camsize.height,
                    type_tag: row.type_tag.as_str(),
                })
                .map_err(|source| StorageError::Csv {
                    path: tmp_path.clone(),
                    source,
                })?;
        }
        writer.flush().map_err(|source| StorageError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }
    std::fs::rename(&tmp_path, index_path).map_err(|source| StorageError::Io {
        path: index_path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_row(event: &str, type_tag: &str) -> DateIndexRow {
        DateIndexRow {
            node: "n1".into(),
            view: "front".into(),
            timestamp: Utc::now(),
            event_id: EventId::new(event).unwrap(),
            camsize: CamSize {
                width: 640,
                height: 360,
            },
            type_tag: TypeTag::new(type_tag).unwrap(),
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("camwatcher.csv");
        append_row(&path, &sample_row("E1", "trk")).unwrap();
        append_row(&path, &sample_row("E1", "obj")).unwrap();
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_id.as_str(), "E1");
    }

    #[test]
    fn skips_truncated_trailing_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("camwatcher.csv");
        append_row(&path, &sample_row("E1", "trk")).unwrap();
        // Simulate a crash mid-write: append a partial, unterminated record.
        use std::io::Write;
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "n1,front,2026-01-01T00:00:00Z,E2,640").unwrap();
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn remove_event_rows_deletes_only_matching_event() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("camwatcher.csv");
        append_row(&path, &sample_row("E1", "trk")).unwrap();
        append_row(&path, &sample_row("E2", "trk")).unwrap();
        remove_event_rows(&path, &EventId::new("E1").unwrap()).unwrap();
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id.as_str(), "E2");
    }
}
