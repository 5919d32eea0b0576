//! Per-`(node, view)` image writer subprocess (§4.4): subscribes to one
//! view's JPEG stream, and writes frames to disk while an event is active.
//! Command/frame races are resolved by running both on one task via
//! `tokio::select!`, the same shape `sentinel`'s job-intake loop uses for
//! its assignment channel.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use sentinelcam_storage::{ensure_date_dir, images};
use sentinelcam_types::EventId;
use sentinelcam_wire::pubsub::Subscriber;
use sentinelcam_wire::reqrep::serve;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum WriterCommand {
    Start(EventId),
    Stop,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Ack;

pub struct ImageWriterOptions {
    pub control_addr: SocketAddr,
    pub jpeg_addr: SocketAddr,
    /// Topic prefix this view's frames are published under, e.g. `n1.front`.
    pub topic_filter: String,
    pub img_root: PathBuf,
}

pub async fn run(opts: ImageWriterOptions) -> anyhow::Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<WriterCommand>(8);

    let control_listener = tokio::net::TcpListener::bind(opts.control_addr).await?;
    tokio::spawn(async move {
        serve_control(control_listener, cmd_tx).await;
    });

    frame_loop(opts.jpeg_addr, opts.topic_filter, opts.img_root, cmd_rx).await
}

async fn serve_control(listener: TcpListener, cmd_tx: mpsc::Sender<WriterCommand>) {
    serve(listener, move |cmd: WriterCommand| {
        let cmd_tx = cmd_tx.clone();
        async move {
            let _ = cmd_tx.send(cmd).await;
            Ack
        }
    })
    .await
    .ok();
}

/// `(event_id, has_written_a_frame)`. `pending_stop` defers disabling writes
/// until the activation has produced at least one frame, per §4.4.
struct ActiveEvent {
    event_id: EventId,
    written: bool,
}

async fn frame_loop(
    jpeg_addr: SocketAddr,
    topic_filter: String,
    img_root: PathBuf,
    mut cmd_rx: mpsc::Receiver<WriterCommand>,
) -> anyhow::Result<()> {
    let mut active: Option<ActiveEvent> = None;
    let mut pending_stop = false;

    loop {
        let mut sub = match Subscriber::<Vec<u8>>::connect(jpeg_addr, &topic_filter).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(%jpeg_addr, error = %e, "could not connect to jpeg stream, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WriterCommand::Start(event_id)) => {
                            tracing::info!(event = %event_id, "image writer activated");
                            active = Some(ActiveEvent { event_id, written: false });
                            pending_stop = false;
                        }
                        Some(WriterCommand::Stop) => {
                            match active.as_ref() {
                                Some(a) if a.written => active = None,
                                Some(_) => pending_stop = true,
                                None => {}
                            }
                        }
                        None => return Ok(()),
                    }
                }
                frame = sub.recv() => {
                    let (_, bytes) = match frame {
                        Ok(f) => f,
                        Err(e) => {
                            tracing::warn!(error = %e, "lost jpeg stream, reconnecting");
                            break;
                        }
                    };
                    if let Some(a) = active.as_mut() {
                        write_frame(&img_root, &a.event_id, &bytes);
                        a.written = true;
                        if pending_stop {
                            active = None;
                            pending_stop = false;
                        }
                    }
                }
            }
        }
    }
}

fn write_frame(img_root: &std::path::Path, event_id: &EventId, bytes: &[u8]) {
    let now = Utc::now();
    let date = now.format("%Y-%m-%d").to_string();
    let path = images::frame_path(img_root, &date, event_id, now);
    if let Some(parent) = path.parent() {
        if let Err(e) = ensure_date_dir(parent) {
            tracing::warn!(path = %path.display(), error = %e, "failed creating image date folder");
            return;
        }
    }
    if let Err(e) = std::fs::write(&path, bytes) {
        tracing::warn!(path = %path.display(), error = %e, "failed writing frame");
    }
}
