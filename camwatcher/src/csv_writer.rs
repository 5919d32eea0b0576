//! Single-thread serializer for tracking CSVs and date-index rows, shared by
//! the ingest dispatcher (in-process) and the analytics subscriber
//! (out-of-process, via [`crate::csv_service`]). Mirrors `datapump`'s purge
//! worker: one `crossbeam-channel` queue drained by a dedicated OS thread.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sentinelcam_storage::{date_index, tracking_csv::TrackingCsvWriter, StorageRoots};
use sentinelcam_types::{CamSize, CsvRef, DateIndexRow, Rect, TrackingRecord};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum CsvRecord {
    Start {
        refkey: CsvRef,
        date: String,
        timestamp: DateTime<Utc>,
        camsize: CamSize,
        /// True for a tracking set the event has not seen before; appends
        /// an index row. False for a refresh of an existing file.
        new: bool,
    },
    Trk {
        refkey: CsvRef,
        timestamp: DateTime<Utc>,
        object_id: i64,
        classname: String,
        rect: Rect,
    },
    End {
        refkey: CsvRef,
    },
}

struct OpenFile {
    date: String,
    writer: TrackingCsvWriter,
}

/// Spawn the writer thread, returning a channel producers enqueue records
/// on. Dropping every clone of the sender lets the thread drain its queue
/// and exit, flushing and closing whatever files remain open.
pub fn spawn(roots: StorageRoots) -> channellib::Sender<CsvRecord> {
    let (tx, rx) = channellib::unbounded::<CsvRecord>();
    std::thread::Builder::new()
        .name("camwatcher-csv".into())
        .spawn(move || run(&roots, &rx))
        .expect("spawn camwatcher csv writer thread");
    tx
}

fn run(roots: &StorageRoots, rx: &channellib::Receiver<CsvRecord>) {
    let mut open: HashMap<CsvRef, OpenFile> = HashMap::new();
    while let Ok(record) = rx.recv() {
        handle(roots, &mut open, record);
    }
    for (refkey, mut file) in open {
        if let Err(e) = file.writer.flush() {
            tracing::warn!(node = %refkey.node, view = %refkey.view, event = %refkey.event_id, error = %e, "failed flushing tracking csv on shutdown");
        }
    }
    tracing::debug!("csv writer exiting: sender dropped");
}

fn handle(roots: &StorageRoots, open: &mut HashMap<CsvRef, OpenFile>, record: CsvRecord) {
    match record {
        CsvRecord::Start {
            refkey,
            date,
            timestamp,
            camsize,
            new,
        } => {
            if new {
                let row = DateIndexRow {
                    node: refkey.node.clone(),
                    view: refkey.view.clone(),
                    timestamp,
                    event_id: refkey.event_id.clone(),
                    camsize,
                    type_tag: refkey.type_tag,
                };
                if let Err(e) = date_index::append_row(&roots.index_path(&date), &row) {
                    tracing::warn!(event = %refkey.event_id, error = %e, "failed appending date index row");
                }
            }
            let path = roots.tracking_csv_path(&date, &refkey.event_id, refkey.type_tag);
            match TrackingCsvWriter::create(&path) {
                Ok(writer) => {
                    open.insert(refkey, OpenFile { date, writer });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed opening tracking csv");
                }
            }
        }

        CsvRecord::Trk {
            refkey,
            timestamp,
            object_id,
            classname,
            rect,
        } => match open.get_mut(&refkey) {
            Some(file) => {
                if let Err(e) = file.writer.append(&TrackingRecord {
                    timestamp,
                    object_id,
                    classname,
                    rect,
                }) {
                    tracing::warn!(event = %refkey.event_id, error = %e, "failed appending tracking record");
                }
            }
            None => {
                tracing::warn!(event = %refkey.event_id, type_tag = %refkey.type_tag, "trk record for a (event, type) with no open file, dropping");
            }
        },

        CsvRecord::End { refkey } => match open.remove(&refkey) {
            Some(mut file) => {
                if let Err(e) = file.writer.flush() {
                    tracing::warn!(event = %refkey.event_id, error = %e, "failed flushing tracking csv on end");
                }
            }
            None => {
                tracing::warn!(event = %refkey.event_id, type_tag = %refkey.type_tag, "end record for a (event, type) with no open file, dropping");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinelcam_storage::tracking_csv;
    use sentinelcam_types::{EventId, TypeTag};
    use std::time::Duration;

    fn refkey(event: &str, tag: &str) -> CsvRef {
        CsvRef {
            node: "n1".into(),
            view: "front".into(),
            event_id: EventId::new(event).unwrap(),
            type_tag: TypeTag::new(tag).unwrap(),
        }
    }

    #[test]
    fn start_trk_end_round_trips_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = StorageRoots::new(tmp.path().join("csv"), tmp.path().join("img"));
        let tx = spawn(roots.clone());
        let date = "2026-07-30".to_string();
        let t0 = Utc::now();

        tx.send(CsvRecord::Start {
            refkey: refkey("E1", "trk"),
            date: date.clone(),
            timestamp: t0,
            camsize: CamSize {
                width: 640,
                height: 360,
            },
            new: true,
        })
        .unwrap();
        tx.send(CsvRecord::Trk {
            refkey: refkey("E1", "trk"),
            timestamp: t0,
            object_id: 1,
            classname: "person".into(),
            rect: Rect {
                x1: 0.0,
                y1: 0.0,
                x2: 1.0,
                y2: 1.0,
            },
        })
        .unwrap();
        tx.send(CsvRecord::End {
            refkey: refkey("E1", "trk"),
        })
        .unwrap();
        drop(tx);

        // Give the background thread a moment to drain the (unbounded,
        // already-queued) requests before asserting on disk.
        std::thread::sleep(Duration::from_millis(100));

        let rows = date_index::read_rows(&roots.index_path(&date)).unwrap();
        assert_eq!(rows.len(), 1);
        let path = roots.tracking_csv_path(&date, &EventId::new("E1").unwrap(), TypeTag::TRK);
        let records = tracking_csv::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
    }
}
