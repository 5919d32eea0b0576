//! Request handling: maps each [`DatapumpRequest`] onto `sentinelcam-storage`
//! reads (or an enqueue onto the purge worker for `del`).

use std::sync::Arc;

use chrono::Utc;
use sentinelcam_storage::{date_index, images, tracking_csv, StorageRoots};
use sentinelcam_types::TypeTag;
use sentinelcam_wire::table::{Column, ColumnData, Table};
use sentinelcam_wire::table::encode_table;

use crate::protocol::{DatapumpRequest, DatapumpResponse};
use crate::purge_worker::PurgeTask;

#[derive(Clone)]
pub struct DatapumpService {
    roots: Arc<StorageRoots>,
    purge_tx: channellib::Sender<PurgeTask>,
}

impl DatapumpService {
    pub fn new(roots: StorageRoots, purge_tx: channellib::Sender<PurgeTask>) -> Self {
        Self {
            roots: Arc::new(roots),
            purge_tx,
        }
    }

    pub async fn handle(&self, req: DatapumpRequest) -> DatapumpResponse {
        let roots = Arc::clone(&self.roots);
        let purge_tx = self.purge_tx.clone();
        // The storage layer is synchronous filesystem I/O; run it off the
        // async reactor thread so one slow query cannot stall the others.
        tokio::task::spawn_blocking(move || handle_blocking(&roots, &purge_tx, req))
            .await
            .unwrap_or_else(|e| DatapumpResponse::Error(format!("task panicked: {e}")))
    }
}

fn handle_blocking(
    roots: &StorageRoots,
    purge_tx: &channellib::Sender<PurgeTask>,
    req: DatapumpRequest,
) -> DatapumpResponse {
    match req {
        DatapumpRequest::Hc => DatapumpResponse::HealthOk,

        DatapumpRequest::Dat => match roots.available_dates() {
            Ok(dates) => DatapumpResponse::Dates(dates),
            Err(e) => DatapumpResponse::Error(e.to_string()),
        },

        DatapumpRequest::Idx { date } => {
            let rows = match date_index::read_rows(&roots.index_path(&date)) {
                Ok(rows) => rows,
                Err(e) => return DatapumpResponse::Error(e.to_string()),
            };
            if rows.is_empty() {
                return DatapumpResponse::TrackingSetEmpty;
            }
            DatapumpResponse::Index(encode_table(&index_table(&rows)))
        }

        DatapumpRequest::Evt { date, evt, trk } => {
            let type_tag = match TypeTag::new(&trk) {
                Ok(t) => t,
                Err(e) => return DatapumpResponse::Error(e.to_string()),
            };
            let event_start = match event_start_timestamp(roots, &date, &evt) {
                Ok(Some(ts)) => ts,
                Ok(None) => return DatapumpResponse::TrackingSetEmpty,
                Err(e) => return DatapumpResponse::Error(e.to_string()),
            };
            let path = roots.tracking_csv_path(&date, &evt, type_tag);
            let records = match tracking_csv::read_records(&path) {
                Ok(records) => records,
                Err(e) => return DatapumpResponse::Error(e.to_string()),
            };
            if records.is_empty() {
                return DatapumpResponse::TrackingSetEmpty;
            }
            DatapumpResponse::Events(encode_table(&events_table(&records, event_start)))
        }

        DatapumpRequest::Img { date, evt } => {
            match images::list_event_frames(&roots.img_root, &date, &evt) {
                Ok(frames) if frames.is_empty() => DatapumpResponse::ImageSetEmpty,
                Ok(frames) => DatapumpResponse::Images(
                    frames
                        .into_iter()
                        .map(|ts| ts.timestamp_nanos_opt().unwrap_or(0))
                        .collect(),
                ),
                Err(e) => DatapumpResponse::Error(e.to_string()),
            }
        }

        DatapumpRequest::Pic {
            date,
            evt,
            frametime,
        } => {
            let Some(ts) = images::parse_frametime(&frametime) else {
                return DatapumpResponse::Error(format!("malformed frametime {frametime:?}"));
            };
            let path = images::frame_path(&roots.img_root, &date, &evt, ts);
            match images::read_jpeg(&path) {
                Ok(bytes) => DatapumpResponse::Picture(bytes),
                Err(_) => DatapumpResponse::Picture(images::SENTINEL_JPEG.to_vec()),
            }
        }

        DatapumpRequest::Del { date, evt } => {
            if purge_tx
                .send(PurgeTask {
                    date,
                    event_id: evt,
                })
                .is_err()
            {
                return DatapumpResponse::Error("purge worker has shut down".into());
            }
            DatapumpResponse::Deleted
        }
    }
}

/// The event's start timestamp is the date-index row recorded for its `trk`
/// tracking set, the canonical one created at `start`. `None` if the event
/// has no rows in the index at all.
fn event_start_timestamp(
    roots: &StorageRoots,
    date: &str,
    evt: &sentinelcam_types::EventId,
) -> Result<Option<chrono::DateTime<Utc>>, sentinelcam_storage::StorageError> {
    let rows = date_index::rows_for_event(&roots.index_path(date), evt)?;
    if rows.is_empty() {
        return Ok(None);
    }
    Ok(rows
        .iter()
        .find(|r| r.type_tag == TypeTag::TRK)
        .or_else(|| rows.iter().min_by_key(|r| r.timestamp))
        .map(|r| r.timestamp))
}

fn index_table(rows: &[sentinelcam_types::DateIndexRow]) -> Table {
    Table::new(vec![
        Column {
            name: "node".into(),
            data: ColumnData::Str(rows.iter().map(|r| r.node.clone()).collect()),
        },
        Column {
            name: "viewname".into(),
            data: ColumnData::Str(rows.iter().map(|r| r.view.clone()).collect()),
        },
        Column {
            name: "timestamp".into(),
            data: ColumnData::I64(
                rows.iter()
                    .map(|r| r.timestamp.timestamp_nanos_opt().unwrap_or(0))
                    .collect(),
            ),
        },
        Column {
            name: "event_id".into(),
            data: ColumnData::Str(rows.iter().map(|r| r.event_id.to_string()).collect()),
        },
        Column {
            name: "width".into(),
            data: ColumnData::I64(rows.iter().map(|r| r.camsize.width as i64).collect()),
        },
        Column {
            name: "height".into(),
            data: ColumnData::I64(rows.iter().map(|r| r.camsize.height as i64).collect()),
        },
        Column {
            name: "type_tag".into(),
            data: ColumnData::Str(rows.iter().map(|r| r.type_tag.to_string()).collect()),
        },
    ])
}

fn events_table(
    records: &[sentinelcam_types::TrackingRecord],
    event_start: chrono::DateTime<Utc>,
) -> Table {
    Table::new(vec![
        Column {
            name: "timestamp".into(),
            data: ColumnData::I64(
                records
                    .iter()
                    .map(|r| r.timestamp.timestamp_nanos_opt().unwrap_or(0))
                    .collect(),
            ),
        },
        Column {
            name: "elapsed".into(),
            data: ColumnData::F64(
                records
                    .iter()
                    .map(|r| {
                        (r.timestamp - event_start)
                            .num_nanoseconds()
                            .unwrap_or(0) as f64
                            / 1_000_000_000.0
                    })
                    .collect(),
            ),
        },
        Column {
            name: "object_id".into(),
            data: ColumnData::I64(records.iter().map(|r| r.object_id).collect()),
        },
        Column {
            name: "classname".into(),
            data: ColumnData::Str(records.iter().map(|r| r.classname.clone()).collect()),
        },
        Column {
            name: "rect_x1".into(),
            data: ColumnData::F64(records.iter().map(|r| r.rect.x1).collect()),
        },
        Column {
            name: "rect_y1".into(),
            data: ColumnData::F64(records.iter().map(|r| r.rect.y1).collect()),
        },
        Column {
            name: "rect_x2".into(),
            data: ColumnData::F64(records.iter().map(|r| r.rect.x2).collect()),
        },
        Column {
            name: "rect_y2".into(),
            data: ColumnData::F64(records.iter().map(|r| r.rect.y2).collect()),
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinelcam_storage::date_index::append_row;
    use sentinelcam_storage::tracking_csv::TrackingCsvWriter;
    use sentinelcam_types::{CamSize, DateIndexRow, EventId, Rect, TrackingRecord};

    fn make_roots() -> (tempfile::TempDir, StorageRoots) {
        let tmp = tempfile::tempdir().unwrap();
        let roots = StorageRoots::new(tmp.path().join("csv"), tmp.path().join("img"));
        (tmp, roots)
    }

    #[tokio::test]
    async fn health_check_replies_ok() {
        let (_tmp, roots) = make_roots();
        let (tx, _rx) = channellib::unbounded();
        let svc = DatapumpService::new(roots, tx);
        assert!(matches!(
            svc.handle(DatapumpRequest::Hc).await,
            DatapumpResponse::HealthOk
        ));
    }

    #[tokio::test]
    async fn idx_on_empty_date_is_tracking_set_empty() {
        let (_tmp, roots) = make_roots();
        let (tx, _rx) = channellib::unbounded();
        let svc = DatapumpService::new(roots, tx);
        let resp = svc
            .handle(DatapumpRequest::Idx {
                date: "2026-07-30".into(),
            })
            .await;
        assert!(matches!(resp, DatapumpResponse::TrackingSetEmpty));
    }

    #[tokio::test]
    async fn evt_round_trips_through_the_table_encoding() {
        let (_tmp, roots) = make_roots();
        let date = "2026-07-30";
        let evt = EventId::new("E1").unwrap();
        let t0 = Utc::now();

        append_row(
            &roots.index_path(date),
            &DateIndexRow {
                node: "n1".into(),
                view: "front".into(),
                timestamp: t0,
                event_id: evt.clone(),
                camsize: CamSize {
                    width: 640,
                    height: 360,
                },
                type_tag: TypeTag::TRK,
            },
        )
        .unwrap();

        let path = roots.tracking_csv_path(date, &evt, TypeTag::TRK);
        let mut writer = TrackingCsvWriter::create(&path).unwrap();
        writer
            .append(&TrackingRecord {
                timestamp: t0 + chrono::Duration::seconds(2),
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
        writer.flush().unwrap();
        drop(writer);

        let (tx, _rx) = channellib::unbounded();
        let svc = DatapumpService::new(roots, tx);
        let resp = svc
            .handle(DatapumpRequest::Evt {
                date: date.into(),
                evt: evt.clone(),
                trk: "trk".into(),
            })
            .await;
        let DatapumpResponse::Events(bytes) = resp else {
            panic!("expected Events, got {resp:?}");
        };
        let table = sentinelcam_wire::table::decode_table(&bytes).unwrap();
        let ColumnData::F64(elapsed) = &table.columns[1].data else {
            panic!("expected elapsed column");
        };
        assert_eq!(elapsed, &vec![2.0]);
    }

    #[tokio::test]
    async fn del_enqueues_a_purge_task() {
        let (_tmp, roots) = make_roots();
        let (tx, rx) = channellib::unbounded();
        let svc = DatapumpService::new(roots, tx);
        let resp = svc
            .handle(DatapumpRequest::Del {
                date: "2026-07-30".into(),
                evt: EventId::new("E1").unwrap(),
            })
            .await;
        assert!(matches!(resp, DatapumpResponse::Deleted));
        let task = rx.recv().unwrap();
        assert_eq!(task.date, "2026-07-30");
    }
}
