//! Messages carried over the per-engine "ring wire" (consumer-driven
//! request/reply) and the scheduler's control REP / result PUB sockets.

use chrono::{DateTime, Utc};
use sentinelcam_types::{EventId, JobId, JobRequest, RingCtrl};
use serde::{Deserialize, Serialize};

/// Sent by the task engine (consumer) to the job manager (producer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RingRequest {
    /// First request for a job, or a request following an event change.
    Start {
        frame_ts: Option<DateTime<Utc>>,
        new_event: Option<(String, EventId)>,
        ringctrl: RingCtrl,
    },
    /// Acknowledges the previous bucket and asks for the next one.
    Next,
}

/// Sent by the job manager in reply to a [`RingRequest`].
///
/// `Started` folds the camsize confirmation the wire protocol calls for on a
/// separate channel into the same reply as the first bucket, the same way
/// the data-access service's response type folds its two-frame reply into
/// one enum — see DESIGN.md.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RingReply {
    Started {
        shmem_name: String,
        width: u32,
        height: u32,
        slot_bytes: usize,
        bucket: Option<usize>,
    },
    Bucket(usize),
    Eof,
    Error(String),
}

/// A job submission or one of the two scheduler introspection meta-tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum SchedulerRequest {
    #[serde(rename = "submit")]
    Submit(JobRequest),
    #[serde(rename = "STATUS")]
    Status,
    #[serde(rename = "HISTORY")]
    History,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineStatus {
    pub name: String,
    pub state: String,
    pub current_job: Option<JobId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SchedulerReply {
    JobId(JobId),
    Status(Vec<EngineStatus>),
    History(Vec<String>),
    Error(String),
}

pub fn topic_for_level(level: &str) -> String {
    format!("Sentinel.{level}")
}
