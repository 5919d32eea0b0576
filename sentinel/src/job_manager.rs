//! Owns every task engine, the per-class on-deck/queue bookkeeping, and the
//! ring-buffer frame-feeding loop. A single `tokio::sync::Mutex` around all
//! mutable state is this crate's rendering of the source's single
//! driver-thread requirement: every mutation (dispatch decision, ring-wire
//! reply) runs with the lock held, so two decisions can never interleave.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sentinelcam_storage::{date_index, images, tracking_csv, StorageRoots};
use sentinelcam_types::{
    EngineEnvelope, EventId, JobClass, JobId, JobRequest, LifecycleEvent, LifecycleFlag,
    RingCtrl, SchedulerMessage, StatusPayload,
};
use sentinelcam_wire::pubsub::Publisher;
use sentinelcam_wire::reqrep::ReqClient;

use crate::ring::{select_model, RingBuffer, RingModel};
use crate::task::TaskDescriptor;
use crate::wire::{topic_for_level, EngineStatus, RingReply, RingRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    FailedOut,
}

pub struct EngineRuntime {
    pub name: String,
    pub classes: Vec<JobClass>,
    pub models: Vec<RingModel>,
    pub job_addr: SocketAddr,
    pub state: EngineState,
    current_job: Option<(JobId, JobRequest)>,
    cursor: Option<EngineCursor>,
}

impl EngineRuntime {
    pub fn new(
        name: String,
        classes: Vec<JobClass>,
        models: Vec<RingModel>,
        job_addr: SocketAddr,
    ) -> Self {
        Self {
            name,
            classes,
            models,
            job_addr,
            state: EngineState::Idle,
            current_job: None,
            cursor: None,
        }
    }
}

struct EngineCursor {
    ring: RingBuffer,
    date: String,
    event_id: EventId,
    frames: Vec<DateTime<Utc>>,
    next_idx: usize,
}

struct QueuedJob {
    jobid: JobId,
    request: JobRequest,
}

struct Inner {
    engines: HashMap<String, EngineRuntime>,
    queues: HashMap<JobClass, VecDeque<QueuedJob>>,
    on_deck: HashMap<JobClass, QueuedJob>,
    history: VecDeque<String>,
}

/// A job assignment handed to an engine's job-intake socket.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct JobAssignment {
    pub jobid: JobId,
    pub request: JobRequest,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Ack;

const HISTORY_CAPACITY: usize = 100;

pub struct JobManager {
    inner: tokio::sync::Mutex<Inner>,
    next_job_id: AtomicU64,
    storage: Arc<StorageRoots>,
    task_catalog: Arc<HashMap<String, TaskDescriptor>>,
    result_pub: Publisher<SchedulerMessage>,
}

impl JobManager {
    pub fn new(
        storage: Arc<StorageRoots>,
        task_catalog: Arc<HashMap<String, TaskDescriptor>>,
        result_pub: Publisher<SchedulerMessage>,
    ) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(Inner {
                engines: HashMap::new(),
                queues: HashMap::new(),
                on_deck: HashMap::new(),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            }),
            next_job_id: AtomicU64::new(1),
            storage,
            task_catalog,
            result_pub,
        }
    }

    pub async fn register_engine(&self, runtime: EngineRuntime) {
        let mut inner = self.inner.lock().await;
        inner.engines.insert(runtime.name.clone(), runtime);
    }

    pub async fn status(&self) -> Vec<EngineStatus> {
        let inner = self.inner.lock().await;
        inner
            .engines
            .values()
            .map(|e| EngineStatus {
                name: e.name.clone(),
                state: match e.state {
                    EngineState::Idle => "idle".to_string(),
                    EngineState::Running => "running".to_string(),
                    EngineState::FailedOut => "failed_out".to_string(),
                },
                current_job: e.current_job.as_ref().map(|(id, _)| *id),
            })
            .collect()
    }

    pub async fn history(&self) -> Vec<String> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    /// Submit a job. Fails only if `request.task` has no catalog entry.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, String> {
        let class = self
            .task_catalog
            .get(&request.task)
            .map(|d| d.class)
            .ok_or_else(|| format!("unknown task {:?}", request.task))?;
        let jobid = JobId(self.next_job_id.fetch_add(1, Ordering::SeqCst));

        self.publish_lifecycle(LifecycleFlag::Submit, jobid, &request);

        {
            let mut inner = self.inner.lock().await;
            let queued = QueuedJob {
                jobid,
                request: request.clone(),
            };
            if inner.on_deck.contains_key(&class) {
                inner.queues.entry(class).or_default().push_back(queued);
            } else {
                inner.on_deck.insert(class, queued);
            }
        }
        self.try_dispatch(class).await;
        Ok(jobid)
    }

    /// If `class`'s on-deck slot is occupied and an idle engine handles that
    /// class, hand the job to it and promote the next queued job (if any)
    /// into the now-empty on-deck slot.
    async fn try_dispatch(&self, class: JobClass) {
        let (engine_name, job_addr, queued) = {
            let mut inner = self.inner.lock().await;
            if !inner.on_deck.contains_key(&class) {
                return;
            }
            let Some(engine_name) = inner
                .engines
                .values()
                .find(|e| e.state == EngineState::Idle && e.classes.contains(&class))
                .map(|e| e.name.clone())
            else {
                return;
            };
            let queued = inner.on_deck.remove(&class).expect("checked above");
            if let Some(next) = inner.queues.get_mut(&class).and_then(|q| q.pop_front()) {
                inner.on_deck.insert(class, next);
            }
            let engine = inner.engines.get_mut(&engine_name).expect("engine exists");
            engine.state = EngineState::Running;
            engine.current_job = Some((queued.jobid, queued.request.clone()));
            (engine_name, engine.job_addr, queued)
        };

        let mut client = ReqClient::new(job_addr, std::time::Duration::from_secs(5));
        let result = client
            .call::<JobAssignment, Ack>(&JobAssignment {
                jobid: queued.jobid,
                request: queued.request,
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(engine = %engine_name, error = %e, "failed to dispatch job to engine");
            let mut inner = self.inner.lock().await;
            if let Some(engine) = inner.engines.get_mut(&engine_name) {
                engine.state = EngineState::Idle;
                engine.current_job = None;
            }
        }
    }

    /// React to an envelope relayed from one engine's local result PUB.
    pub async fn on_engine_envelope(&self, engine_name: &str, envelope: EngineEnvelope) {
        match &envelope {
            EngineEnvelope::Started { jobid } => {
                if let Some(request) = self.current_request(engine_name, *jobid).await {
                    self.publish_lifecycle(LifecycleFlag::Start, *jobid, &request);
                }
                self.relay(&envelope);
            }
            EngineEnvelope::Status { .. } => {
                self.relay(&envelope);
            }
            EngineEnvelope::Done { jobid, image_count } => {
                self.record_history(format!("{jobid} done, {image_count} frames"))
                    .await;
                self.stop_job(engine_name, *jobid).await;
                self.relay(&envelope);
            }
            EngineEnvelope::Fail { jobid, reason } => {
                self.record_history(format!("{jobid} failed: {reason}"))
                    .await;
                self.stop_job(engine_name, *jobid).await;
                self.relay(&envelope);
            }
            EngineEnvelope::Canceled { jobid } => {
                self.record_history(format!("{jobid} canceled")).await;
                self.stop_job(engine_name, *jobid).await;
                self.relay(&envelope);
            }
            EngineEnvelope::Bomb { engine } => {
                // TODO: no supervised restart of a bombed-out engine; it
                // stays removed until the process is relaunched externally.
                tracing::warn!(%engine, "engine reported BOMB, removing from live set");
                let mut inner = self.inner.lock().await;
                inner.engines.remove(engine);
                drop(inner);
                self.relay(&envelope);
            }
        }
    }

    async fn current_request(&self, engine_name: &str, jobid: JobId) -> Option<JobRequest> {
        let inner = self.inner.lock().await;
        inner.engines.get(engine_name).and_then(|e| {
            e.current_job
                .as_ref()
                .filter(|(id, _)| *id == jobid)
                .map(|(_, req)| req.clone())
        })
    }

    /// Publish the STOP lifecycle bracket and free the engine for dispatch.
    async fn stop_job(&self, engine_name: &str, jobid: JobId) {
        let (request, classes) = {
            let mut inner = self.inner.lock().await;
            let Some(engine) = inner.engines.get_mut(engine_name) else {
                return;
            };
            let request = match &engine.current_job {
                Some((id, _)) if *id == jobid => engine.current_job.take().map(|(_, req)| req),
                _ => None,
            };
            engine.cursor = None;
            engine.state = EngineState::Idle;
            (request, engine.classes.clone())
        };
        if let Some(request) = request {
            self.publish_lifecycle(LifecycleFlag::Stop, jobid, &request);
        }
        for class in classes {
            self.try_dispatch(class).await;
        }
    }

    fn publish_lifecycle(&self, flag: LifecycleFlag, jobid: JobId, request: &JobRequest) {
        let event = LifecycleEvent {
            flag,
            jobid,
            task: request.task.clone(),
            source_node: request.node.clone(),
            date: Some(request.date.clone()),
            event_id: request.event.clone(),
        };
        self.result_pub
            .publish(topic_for_level("INFO"), SchedulerMessage::Lifecycle(event));
    }

    fn relay(&self, envelope: &EngineEnvelope) {
        let msg = match envelope {
            EngineEnvelope::Status { jobid, payload } => match payload {
                StatusPayload::Frame(result) => SchedulerMessage::Frame {
                    jobid: *jobid,
                    result: result.clone(),
                },
                StatusPayload::Text(text) => SchedulerMessage::Text(text.clone()),
            },
            EngineEnvelope::Fail { reason, .. } => SchedulerMessage::Text(reason.clone()),
            _ => return,
        };
        self.result_pub.publish(topic_for_level("INFO"), msg);
    }

    async fn record_history(&self, entry: String) {
        let mut inner = self.inner.lock().await;
        if inner.history.len() >= HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(entry);
    }

    /// Handle one ring-wire request from `engine_name`.
    pub async fn handle_ring_request(&self, engine_name: &str, req: RingRequest) -> RingReply {
        match req {
            RingRequest::Start {
                frame_ts,
                new_event,
                ringctrl,
            } => {
                self.ring_start(engine_name, frame_ts, new_event, ringctrl)
                    .await
            }
            RingRequest::Next => self.ring_next(engine_name).await,
        }
    }

    async fn ring_start(
        &self,
        engine_name: &str,
        frame_ts: Option<DateTime<Utc>>,
        new_event: Option<(String, EventId)>,
        ringctrl: RingCtrl,
    ) -> RingReply {
        let Some((date, event_id)) = new_event else {
            return RingReply::Error("START requires new_event on first use".into());
        };

        let rows = match date_index::rows_for_event(&self.storage.index_path(&date), &event_id) {
            Ok(rows) => rows,
            Err(e) => return RingReply::Error(e.to_string()),
        };
        let Some(camsize) = rows.first().map(|r| r.camsize) else {
            return RingReply::Error(format!("event {event_id} not found in date index"));
        };

        let frames = match self.frame_list(&date, &event_id, ringctrl) {
            Ok(frames) => frames,
            Err(e) => return RingReply::Error(e),
        };

        let mut inner = self.inner.lock().await;
        let Some(engine) = inner.engines.get_mut(engine_name) else {
            return RingReply::Error("unknown engine".into());
        };

        let model = match select_model(&engine.models, camsize.width, camsize.height) {
            Ok(model) => model,
            Err(e) => return RingReply::Error(e.to_string()),
        };
        let slot_bytes = model.slot_bytes();
        let ring = match RingBuffer::create(engine_name, model) {
            Ok(ring) => ring,
            Err(e) => return RingReply::Error(e.to_string()),
        };
        let shmem_name = ring.shmem_name().to_string();

        let start_idx = frame_ts
            .map(|ts| frames.iter().position(|f| *f >= ts).unwrap_or(frames.len()))
            .unwrap_or(0);

        let mut cursor = EngineCursor {
            ring,
            date,
            event_id,
            frames,
            next_idx: start_idx,
        };
        let bucket = fetch_and_put(&self.storage, &mut cursor);
        engine.cursor = Some(cursor);

        RingReply::Started {
            shmem_name,
            width: camsize.width,
            height: camsize.height,
            slot_bytes,
            bucket,
        }
    }

    async fn ring_next(&self, engine_name: &str) -> RingReply {
        let mut inner = self.inner.lock().await;
        let Some(engine) = inner.engines.get_mut(engine_name) else {
            return RingReply::Error("unknown engine".into());
        };
        let Some(cursor) = engine.cursor.as_mut() else {
            return RingReply::Eof;
        };
        cursor.ring.frame_complete();
        match fetch_and_put(&self.storage, cursor) {
            Some(idx) => RingReply::Bucket(idx),
            None => RingReply::Eof,
        }
    }

    fn frame_list(
        &self,
        date: &str,
        event_id: &EventId,
        ringctrl: RingCtrl,
    ) -> Result<Vec<DateTime<Utc>>, String> {
        match ringctrl {
            RingCtrl::Full => images::list_event_frames(&self.storage.img_root, date, event_id)
                .map_err(|e| e.to_string()),
            RingCtrl::Type(type_tag) => {
                let path = self.storage.tracking_csv_path(date, event_id, type_tag);
                tracking_csv::read_records(&path)
                    .map(|records| records.into_iter().map(|r| r.timestamp).collect())
                    .map_err(|e| e.to_string())
            }
        }
    }
}

/// Fetch the frame at `cursor.next_idx`, decode it to packed BGR, and put it
/// into the ring buffer, advancing the cursor. `None` once the frame list is
/// exhausted or a frame on disk cannot be read/decoded.
fn fetch_and_put(storage: &StorageRoots, cursor: &mut EngineCursor) -> Option<usize> {
    if cursor.next_idx >= cursor.frames.len() {
        return None;
    }
    let ts = cursor.frames[cursor.next_idx];
    cursor.next_idx += 1;
    let path = images::frame_path(&storage.img_root, &cursor.date, &cursor.event_id, ts);
    let jpeg = images::read_jpeg(&path).ok()?;
    let bgr = decode_to_bgr(&jpeg)?;
    cursor.ring.put(&bgr).ok()
}

/// `image` decodes to RGB; vision pipelines in this ecosystem expect BGR, so
/// swap channels after decode rather than carry a second codec.
fn decode_to_bgr(jpeg: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(jpeg).ok()?.to_rgb8();
    let mut bytes = img.into_raw();
    for px in bytes.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    Some(bytes)
}
