//! Ingest dispatcher (§4.3): subscribes to every registered outpost's log
//! stream, drives the (node, view)'s image writer, and feeds the CSV
//! writer. One subscription task per outpost; ordering within a
//! `(node, view)` falls out of that subscriber being single-consumer.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sentinelcam_types::{CsvRef, JobRequest, TrackingMessage, TypeTag};
use sentinelcam_wire::pubsub::Subscriber;
use sentinelcam_wire::reqrep::ReqClient;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{CamwatcherConfig, OutpostDescriptor, SchedulerAgent};
use crate::csv_writer::CsvRecord;
use crate::imgwriter::{self, WriterCommand};
use crate::registry::{outpost_key, OutpostKey, OutpostRegistry};

/// One message as published on an outpost's log endpoint. `Tracking` covers
/// the `ote` category; the rest cover `fps` / `Exi` / everything else,
/// which `TrackingMessage` (the `ote` payload type) has no variant for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OutpostLogMessage {
    Tracking(TrackingMessage),
    Heartbeat { fps: f64 },
    Exit,
    Text(String),
}

pub struct Dispatcher {
    registry: Arc<OutpostRegistry>,
    csv_tx: channellib::Sender<CsvRecord>,
    scheduler: Option<SchedulerAgent>,
    scheduler_client: Mutex<Option<ReqClient>>,
    writer_clients: Mutex<HashMap<OutpostKey, ReqClient>>,
    children: Mutex<Vec<Child>>,
    imgwriter_exe: PathBuf,
    img_root: PathBuf,
    control_host: IpAddr,
    control_base_port: u16,
    next_offset: AtomicU16,
}

impl Dispatcher {
    pub fn new(config: &CamwatcherConfig) -> Self {
        Self {
            registry: Arc::new(OutpostRegistry::new()),
            csv_tx: crate::csv_writer::spawn(sentinelcam_storage::StorageRoots::new(
                config.storage.csv_root.clone(),
                config.storage.img_root.clone(),
            )),
            scheduler: config.scheduler.clone(),
            scheduler_client: Mutex::new(None),
            writer_clients: Mutex::new(HashMap::new()),
            children: Mutex::new(Vec::new()),
            imgwriter_exe: config
                .imgwriter_exe
                .clone()
                .unwrap_or_else(|| PathBuf::from("camwatcher-imgwriter")),
            img_root: config.storage.img_root.clone(),
            control_host: config.control_addr.ip(),
            control_base_port: config.control_addr.port(),
            next_offset: AtomicU16::new(1),
        }
    }

    /// Used by the binary entrypoint to hand the dispatcher's CSV writer
    /// channel to the cross-process CSV service.
    pub fn csv_sender(&self) -> channellib::Sender<CsvRecord> {
        self.csv_tx.clone()
    }

    pub fn registry(&self) -> Arc<OutpostRegistry> {
        Arc::clone(&self.registry)
    }

    /// `CameraUp`: register a new outpost, spawning its image writer and
    /// subscribing to its logger. A no-op if `(node, view)` is already
    /// registered.
    pub async fn register_outpost(self: &Arc<Self>, descriptor: OutpostDescriptor) -> Result<(), String> {
        let key = outpost_key(&descriptor);
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let writer_control_addr = SocketAddr::new(self.control_host, self.control_base_port + offset);

        if !self
            .registry
            .insert_if_absent(key.clone(), descriptor.clone(), writer_control_addr)
            .await
        {
            tracing::debug!(node = %descriptor.node, view = %descriptor.view, "duplicate outpost registration, ignoring");
            return Ok(());
        }

        let topic_filter = format!("{}.{}", descriptor.node, descriptor.view);
        let child = std::process::Command::new(&self.imgwriter_exe)
            .arg("--control-addr")
            .arg(writer_control_addr.to_string())
            .arg("--jpeg-addr")
            .arg(descriptor.image_publisher.to_string())
            .arg("--topic-filter")
            .arg(&topic_filter)
            .arg("--img-root")
            .arg(&self.img_root)
            .spawn()
            .map_err(|e| format!("spawning image writer for {topic_filter}: {e}"))?;
        self.children.lock().await.push(child);
        tracing::info!(node = %descriptor.node, view = %descriptor.view, %writer_control_addr, "spawned image writer");

        let dispatcher = Arc::clone(self);
        let log_addr = descriptor.logger;
        tokio::spawn(async move {
            dispatcher.run_outpost_log(key, log_addr).await;
        });

        Ok(())
    }

    async fn run_outpost_log(self: Arc<Self>, key: OutpostKey, log_addr: SocketAddr) {
        loop {
            let mut sub = match Subscriber::<OutpostLogMessage>::connect(log_addr, "").await {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::warn!(node = %key.0, view = %key.1, %log_addr, error = %e, "could not connect to outpost logger, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            loop {
                match sub.recv().await {
                    Ok((_, msg)) => self.handle_log_message(&key, msg).await,
                    Err(e) => {
                        tracing::warn!(node = %key.0, view = %key.1, error = %e, "lost outpost log stream, reconnecting");
                        break;
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn handle_log_message(&self, key: &OutpostKey, msg: OutpostLogMessage) {
        match msg {
            OutpostLogMessage::Tracking(TrackingMessage::Start { id, view, camsize, .. }) => {
                let (node, _) = key;
                let date = Utc::now().format("%Y-%m-%d").to_string();
                if let Err(e) = self.send_writer_command(key, WriterCommand::Start(id.clone())).await {
                    tracing::warn!(node = %node, view = %view, error = %e, "failed starting image writer");
                }
                let _ = self.csv_tx.send(CsvRecord::Start {
                    refkey: CsvRef {
                        node: node.clone(),
                        view,
                        event_id: id,
                        type_tag: TypeTag::TRK,
                    },
                    date,
                    timestamp: Utc::now(),
                    camsize,
                    new: true,
                });
            }

            OutpostLogMessage::Tracking(TrackingMessage::Trk {
                id,
                view,
                obj,
                clas,
                rect,
                timestamp,
            }) => {
                let _ = self.csv_tx.send(CsvRecord::Trk {
                    refkey: CsvRef {
                        node: key.0.clone(),
                        view,
                        event_id: id,
                        type_tag: TypeTag::TRK,
                    },
                    timestamp,
                    object_id: obj,
                    classname: clas,
                    rect,
                });
            }

            OutpostLogMessage::Tracking(TrackingMessage::End { id, view }) => {
                if let Err(e) = self.send_writer_command(key, WriterCommand::Stop).await {
                    tracing::warn!(node = %key.0, view = %view, error = %e, "failed stopping image writer");
                }
                let _ = self.csv_tx.send(CsvRecord::End {
                    refkey: CsvRef {
                        node: key.0.clone(),
                        view,
                        event_id: id.clone(),
                        type_tag: TypeTag::TRK,
                    },
                });
                self.submit_post_event_task(&key.0, &id).await;
            }

            OutpostLogMessage::Heartbeat { .. } => {
                self.registry.touch_heartbeat(key, Utc::now()).await;
            }

            OutpostLogMessage::Exit => {
                tracing::info!(node = %key.0, view = %key.1, "outpost reported exit");
            }

            OutpostLogMessage::Text(text) => {
                tracing::info!(node = %key.0, view = %key.1, %text, "outpost log");
            }
        }
    }

    async fn send_writer_command(&self, key: &OutpostKey, cmd: WriterCommand) -> Result<(), String> {
        let Some(state) = self.registry.get(key).await else {
            return Err("outpost not registered".to_string());
        };
        let mut clients = self.writer_clients.lock().await;
        let client = clients
            .entry(key.clone())
            .or_insert_with(|| ReqClient::new(state.writer_control_addr, Duration::from_secs(5)));
        client
            .call::<WriterCommand, imgwriter::Ack>(&cmd)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn submit_post_event_task(&self, node: &str, event_id: &sentinelcam_types::EventId) {
        let Some(agent) = self.scheduler.as_ref() else {
            return;
        };
        let Some(task) = agent.post_event_task.as_ref() else {
            return;
        };
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let request = sentinel::wire::SchedulerRequest::Submit(JobRequest {
            task: task.clone(),
            date,
            event: Some(event_id.clone()),
            sink: None,
            node: Some(node.to_string()),
            pump: None,
        });
        let mut guard = self.scheduler_client.lock().await;
        let client = guard.get_or_insert_with(|| ReqClient::new(agent.sentinel_addr, Duration::from_secs(5)));
        match client
            .call::<sentinel::wire::SchedulerRequest, sentinel::wire::SchedulerReply>(&request)
            .await
        {
            Ok(sentinel::wire::SchedulerReply::JobId(jobid)) => {
                tracing::info!(%jobid, %task, event = %event_id, "submitted post-event analytic task");
            }
            Ok(sentinel::wire::SchedulerReply::Error(e)) => {
                tracing::warn!(%task, event = %event_id, error = %e, "scheduler rejected post-event task");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%task, event = %event_id, error = %e, "failed submitting post-event task");
            }
        }
    }

    /// Observability-only heartbeat sweep (no deregistration, no writer
    /// stop): logs a warning for any view whose last `fps` heartbeat is
    /// older than `stale_after`.
    pub async fn heartbeat_sweep(&self, stale_after: chrono::Duration) {
        let stale = self.registry.stale_views(Utc::now(), stale_after).await;
        for (node, view) in stale {
            tracing::warn!(%node, %view, "no heartbeat received recently");
        }
    }
}
