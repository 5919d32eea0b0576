//! The outpost registry: "any map shared between the ingest dispatcher and
//! the control socket is guarded by a single lock" — here, one
//! `tokio::sync::Mutex` around a plain `HashMap`, mirroring `sentinel`'s
//! `JobManager::inner` approach to the same single-driver-lock requirement.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::OutpostDescriptor;

#[derive(Clone, Debug)]
pub struct OutpostState {
    pub descriptor: OutpostDescriptor,
    pub writer_control_addr: SocketAddr,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

pub type OutpostKey = (String, String);

pub fn outpost_key(descriptor: &OutpostDescriptor) -> OutpostKey {
    (descriptor.node.clone(), descriptor.view.clone())
}

pub struct OutpostRegistry {
    inner: Mutex<HashMap<OutpostKey, OutpostState>>,
}

impl OutpostRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a newly registered outpost. Returns `false` (a no-op) if the
    /// `(node, view)` key is already registered.
    pub async fn insert_if_absent(
        &self,
        key: OutpostKey,
        descriptor: OutpostDescriptor,
        writer_control_addr: SocketAddr,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&key) {
            return false;
        }
        inner.insert(
            key,
            OutpostState {
                descriptor,
                writer_control_addr,
                last_heartbeat: None,
            },
        );
        true
    }

    pub async fn get(&self, key: &OutpostKey) -> Option<OutpostState> {
        self.inner.lock().await.get(key).cloned()
    }

    pub async fn touch_heartbeat(&self, key: &OutpostKey, at: DateTime<Utc>) {
        if let Some(state) = self.inner.lock().await.get_mut(key) {
            state.last_heartbeat = Some(at);
        }
    }

    /// Views with no heartbeat recorded within `stale_after`, for the
    /// observability-only liveness sweep. Never deregisters anything.
    pub async fn stale_views(
        &self,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Vec<OutpostKey> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|(_, state)| match state.last_heartbeat {
                Some(last) => now - last > stale_after,
                None => true,
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Default for OutpostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(node: &str, view: &str) -> OutpostDescriptor {
        OutpostDescriptor {
            node: node.into(),
            view: view.into(),
            image_publisher: "127.0.0.1:9000".parse().unwrap(),
            logger: "127.0.0.1:9001".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_no_op() {
        let registry = OutpostRegistry::new();
        let key = ("n1".to_string(), "front".to_string());
        let addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        assert!(
            registry
                .insert_if_absent(key.clone(), descriptor("n1", "front"), addr)
                .await
        );
        assert!(
            !registry
                .insert_if_absent(key.clone(), descriptor("n1", "front"), addr)
                .await
        );
    }

    #[tokio::test]
    async fn unseen_heartbeat_counts_as_stale() {
        let registry = OutpostRegistry::new();
        let key = ("n1".to_string(), "front".to_string());
        registry
            .insert_if_absent(key.clone(), descriptor("n1", "front"), "127.0.0.1:9100".parse().unwrap())
            .await;
        let stale = registry.stale_views(Utc::now(), chrono::Duration::seconds(30)).await;
        assert_eq!(stale, vec![key]);
    }
}
