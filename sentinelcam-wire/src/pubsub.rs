//! Topic-filtered publish/subscribe transport built on broadcast + TCP.
//!
//! Used for the outpost log streams (ingest dispatcher is the subscriber)
//! and the scheduler's result stream (camwatcher's analytics subscriber is
//! the subscriber). A subscriber connects, sends one ASCII line naming its
//! topic-prefix filter (empty line = subscribe to everything), then reads
//! one frame per published message whose topic starts with that prefix.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::framing::{read_frame, write_frame};
use crate::WireError;

#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct Envelope<T> {
    topic: String,
    payload: T,
}

/// Publisher side. Cloning shares the same underlying broadcast channel, so
/// `publish` can be called from any task.
#[derive(Clone)]
pub struct Publisher<T> {
    tx: broadcast::Sender<Envelope<T>>,
}

impl<T> Publisher<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish `msg` under `topic`. Silently dropped if there are no
    /// subscribers; that is expected when nothing is watching the log.
    pub fn publish(&self, topic: impl Into<String>, msg: T) {
        let _ = self.tx.send(Envelope {
            topic: topic.into(),
            payload: msg,
        });
    }

    /// Accept subscriber connections on `listener` until the listener
    /// itself errors out. Each connection gets its own broadcast receiver
    /// and forwards only messages matching the subscriber's topic filter.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), WireError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let mut rx = self.tx.subscribe();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut filter = String::new();
                if reader.read_line(&mut filter).await.is_err() {
                    return;
                }
                let filter = filter.trim_end_matches(['\r', '\n']).to_string();
                tracing::debug!(%peer, %filter, "subscriber connected");
                loop {
                    match rx.recv().await {
                        Ok(env) => {
                            if !env.topic.starts_with(&filter) {
                                continue;
                            }
                            if write_frame(&mut write_half, &env).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(%peer, skipped = n, "subscriber fell behind, skipping");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
    }
}

/// Subscriber side: one TCP connection plus a topic-prefix filter sent at
/// connect time.
pub struct Subscriber<T> {
    stream: TcpStream,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Subscriber<T>
where
    T: DeserializeOwned,
{
    pub async fn connect(
        addr: std::net::SocketAddr,
        topic_filter: &str,
    ) -> Result<Self, WireError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        stream.write_all(topic_filter.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        Ok(Self {
            stream,
            _marker: std::marker::PhantomData,
        })
    }

    pub async fn recv(&mut self) -> Result<(String, T), WireError> {
        let env: Envelope<T> = read_frame(&mut self.stream).await?;
        Ok((env.topic, env.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_only_sees_matching_topics() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let publisher: Publisher<String> = Publisher::new(16);
        let serve_pub = publisher.clone();
        tokio::spawn(async move {
            serve_pub.serve(listener).await.ok();
        });

        let mut sub = Subscriber::<String>::connect(addr, "node1.").await.unwrap();
        // give the server task a moment to register the subscription
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        publisher.publish("node2.INFO", "ignored".to_string());
        publisher.publish("node1.INFO", "seen".to_string());

        let (topic, payload) = sub.recv().await.unwrap();
        assert_eq!(topic, "node1.INFO");
        assert_eq!(payload, "seen");
    }
}
