//! Ingest control socket: ASCII `CameraUp|<json-outpost-descriptor>`, reply
//! `OK`/`Error`. The only defined command, per §6.

use std::sync::Arc;

use sentinelcam_wire::control::{read_command_line, write_reply};
use tokio::io::BufReader;
use tokio::net::TcpListener;

use crate::config::OutpostDescriptor;
use crate::dispatcher::Dispatcher;

pub async fn run(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut writer = write_half;
            loop {
                let (cmd, payload) = match read_command_line(&mut reader).await {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "control connection closed");
                        break;
                    }
                };
                let reply = handle(&dispatcher, &cmd, &payload).await;
                if write_reply(&mut writer, &reply).await.is_err() {
                    break;
                }
            }
        });
    }
}

async fn handle(dispatcher: &Arc<Dispatcher>, cmd: &str, payload: &str) -> String {
    match cmd {
        "CameraUp" => match serde_json::from_str::<OutpostDescriptor>(payload) {
            Ok(descriptor) => match dispatcher.register_outpost(descriptor).await {
                Ok(()) => "OK".to_string(),
                Err(e) => format!("Error|{e}"),
            },
            Err(e) => {
                tracing::warn!(error = %e, %payload, "malformed CameraUp payload, dropping");
                format!("Error|malformed payload: {e}")
            }
        },
        other => {
            tracing::warn!(command = %other, "unknown control command, dropping");
            format!("Error|unknown command {other:?}")
        }
    }
}
