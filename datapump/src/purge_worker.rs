//! Single-writer background thread performing asynchronous `del` purges.
//! Failures are logged, never retried transactionally — matching
//! `WriterFailure` semantics elsewhere in the system.

use sentinelcam_storage::{purge::purge_event, StorageRoots};
use sentinelcam_types::EventId;

pub struct PurgeTask {
    pub date: String,
    pub event_id: EventId,
}

pub fn spawn(roots: StorageRoots) -> channellib::Sender<PurgeTask> {
    let (tx, rx) = channellib::unbounded::<PurgeTask>();
    std::thread::Builder::new()
        .name("datapump-purge".into())
        .spawn(move || {
            while let Ok(task) = rx.recv() {
                tracing::info!(date = %task.date, event = %task.event_id, "purging event");
                if let Err(e) = purge_event(&roots, &task.date, &task.event_id) {
                    tracing::warn!(date = %task.date, event = %task.event_id, error = %e, "purge failed");
                }
            }
            tracing::debug!("purge worker exiting: sender dropped");
        })
        .expect("spawn datapump purge worker thread");
    tx
}
