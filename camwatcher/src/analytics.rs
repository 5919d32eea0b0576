//! Analytics subscriber (§4.9): consumes the scheduler's unified result
//! stream and turns per-frame results back into tracking-CSV records,
//! translating each `offset` into an absolute frame timestamp against the
//! event's frame list.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sentinelcam_storage::{date_index, images, tracking_csv, StorageRoots};
use sentinelcam_types::{
    CsvRef, EventId, FrameResult, JobId, LifecycleEvent, LifecycleFlag, RingCtrl, SchedulerMessage,
    TypeTag,
};
use sentinelcam_wire::pubsub::Subscriber;
use sentinelcam_wire::reqrep::ReqClient;
use tokio::sync::Mutex;

use crate::csv_service::Ack;
use crate::csv_writer::CsvRecord;

struct OpenRefkey {
    view: String,
    framelist: Vec<DateTime<Utc>>,
    start_idx: usize,
    last_start: DateTime<Utc>,
}

struct JobContext {
    source_node: Option<String>,
    date: Option<String>,
    event_id: Option<EventId>,
    opened: HashMap<TypeTag, OpenRefkey>,
}

pub struct AnalyticsSubscriber {
    storage: StorageRoots,
    csv_client: Mutex<ReqClient>,
    contexts: Mutex<HashMap<JobId, JobContext>>,
}

impl AnalyticsSubscriber {
    pub fn new(storage: StorageRoots, csv_addr: SocketAddr) -> Self {
        Self {
            storage,
            csv_client: Mutex::new(ReqClient::new(csv_addr, Duration::from_secs(5))),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>, result_addr: SocketAddr) -> anyhow::Result<()> {
        loop {
            let mut sub = match Subscriber::<SchedulerMessage>::connect(result_addr, "").await {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::warn!(%result_addr, error = %e, "could not connect to scheduler result stream, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            loop {
                match sub.recv().await {
                    Ok((_, msg)) => self.handle(msg).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "lost scheduler result stream, reconnecting");
                        break;
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn handle(&self, msg: SchedulerMessage) {
        match msg {
            SchedulerMessage::Lifecycle(event) => self.handle_lifecycle(event).await,
            SchedulerMessage::Frame { jobid, result } => self.handle_frame(jobid, result).await,
            SchedulerMessage::Text(text) => tracing::info!(%text, "scheduler log"),
        }
    }

    async fn handle_lifecycle(&self, event: LifecycleEvent) {
        let mut contexts = self.contexts.lock().await;
        match event.flag {
            LifecycleFlag::Submit => {}
            LifecycleFlag::Start => {
                contexts.insert(
                    event.jobid,
                    JobContext {
                        source_node: event.source_node,
                        date: event.date,
                        event_id: event.event_id,
                        opened: HashMap::new(),
                    },
                );
            }
            LifecycleFlag::Stop => {
                if let Some(ctx) = contexts.remove(&event.jobid) {
                    drop(contexts);
                    if let (Some(node), Some(event_id)) = (ctx.source_node, ctx.event_id) {
                        for (type_tag, open) in ctx.opened {
                            self.enqueue(CsvRecord::End {
                                refkey: CsvRef {
                                    node: node.clone(),
                                    view: open.view,
                                    event_id: event_id.clone(),
                                    type_tag,
                                },
                            })
                            .await;
                        }
                    }
                    return;
                }
            }
        }
    }

    async fn handle_frame(&self, jobid: JobId, result: FrameResult) {
        let mut contexts = self.contexts.lock().await;
        let Some(ctx) = contexts.get_mut(&jobid) else {
            tracing::warn!(%jobid, "frame result for a job with no lifecycle context, dropping");
            return;
        };
        let (Some(node), Some(date), Some(event_id)) =
            (ctx.source_node.clone(), ctx.date.clone(), ctx.event_id.clone())
        else {
            tracing::warn!(%jobid, "frame result for a job with no source event, dropping");
            return;
        };

        if !ctx.opened.contains_key(&result.refkey) {
            let Some((view, camsize)) = self.event_view_and_camsize(&date, &event_id).await else {
                tracing::warn!(%jobid, event = %event_id, "no primary tracking row for event yet, dropping frame result");
                return;
            };
            let framelist = self.materialize_framelist(&date, &event_id, result.ringctrl).await;
            let start_idx = nearest_index(&framelist, result.start);
            let new = !ctx.opened.contains_key(&result.refkey);
            ctx.opened.insert(
                result.refkey,
                OpenRefkey {
                    view: view.clone(),
                    framelist,
                    start_idx,
                    last_start: result.start,
                },
            );
            self.enqueue(CsvRecord::Start {
                refkey: CsvRef {
                    node: node.clone(),
                    view,
                    event_id: event_id.clone(),
                    type_tag: result.refkey,
                },
                date: date.clone(),
                timestamp: result.start,
                camsize,
                new,
            })
            .await;
        }

        let open = ctx.opened.get_mut(&result.refkey).expect("just inserted above");
        if open.last_start != result.start {
            open.start_idx = nearest_index(&open.framelist, result.start);
            open.last_start = result.start;
        }
        let Some(&timestamp) = open
            .framelist
            .get((open.start_idx + result.offset as usize).min(open.framelist.len().saturating_sub(1)))
        else {
            return;
        };
        let refkey = CsvRef {
            node,
            view: open.view.clone(),
            event_id,
            type_tag: result.refkey,
        };
        drop(contexts);
        self.enqueue(CsvRecord::Trk {
            refkey,
            timestamp,
            // `FrameResult` carries no object id — analytic overlays are
            // one detection per published frame, not a multi-object track.
            object_id: 0,
            classname: result.clas,
            rect: result.rect,
        })
        .await;
    }

    async fn event_view_and_camsize(
        &self,
        date: &str,
        event_id: &EventId,
    ) -> Option<(String, sentinelcam_types::CamSize)> {
        let rows = date_index::rows_for_event(&self.storage.index_path(date), event_id).ok()?;
        rows.into_iter()
            .find(|r| r.type_tag == TypeTag::TRK)
            .map(|r| (r.view, r.camsize))
    }

    async fn materialize_framelist(
        &self,
        date: &str,
        event_id: &EventId,
        ringctrl: RingCtrl,
    ) -> Vec<DateTime<Utc>> {
        let result = match ringctrl {
            RingCtrl::Full => images::list_event_frames(&self.storage.img_root, date, event_id),
            RingCtrl::Type(tag) => {
                let path = self.storage.tracking_csv_path(date, event_id, tag);
                tracking_csv::read_records(&path)
                    .map(|records| records.into_iter().map(|r| r.timestamp).collect())
            }
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(%date, event = %event_id, error = %e, "failed materializing frame list");
            Vec::new()
        })
    }

    async fn enqueue(&self, record: CsvRecord) {
        let mut client = self.csv_client.lock().await;
        if let Err(e) = client.call::<CsvRecord, Ack>(&record).await {
            tracing::warn!(error = %e, "failed enqueuing csv record from analytics subscriber");
        }
    }
}

/// Smallest index whose timestamp is `>= target`, clamped to the last
/// index when every frame precedes `target`. `framelist` is `None`/empty
/// safe: callers check `Option::get` on the result.
fn nearest_index(framelist: &[DateTime<Utc>], target: DateTime<Utc>) -> usize {
    if framelist.is_empty() {
        return 0;
    }
    match framelist.binary_search(&target) {
        Ok(i) => i,
        Err(i) => i.min(framelist.len() - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn nearest_index_finds_first_at_or_after_target() {
        let t0 = Utc::now();
        let frames = vec![t0, t0 + ChronoDuration::seconds(1), t0 + ChronoDuration::seconds(2)];
        assert_eq!(nearest_index(&frames, t0 + ChronoDuration::milliseconds(500)), 1);
        assert_eq!(nearest_index(&frames, t0 - ChronoDuration::seconds(1)), 0);
        assert_eq!(nearest_index(&frames, t0 + ChronoDuration::seconds(10)), 2);
    }

    #[test]
    fn nearest_index_on_empty_framelist_is_zero() {
        assert_eq!(nearest_index(&[], Utc::now()), 0);
    }
}
