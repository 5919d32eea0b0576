//! Shared data model for the three SentinelCam services: `camwatcher`
//! (ingest), `datapump` (data access), and `sentinel` (analytics scheduler).
//!
//! Types here cross process boundaries on the wire or the filesystem, so
//! everything is `Serialize`/`Deserialize` and cheap to clone.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("type tag must be exactly 3 ASCII characters, got {0:?}")]
    InvalidTypeTag(String),
    #[error("event id must not be empty")]
    EmptyEventId,
    #[error("ringctrl must be \"full\" or a 3-character type tag, got {0:?}")]
    InvalidRingCtrl(String),
}

/// Three-character tag naming the source of a tracking set (`trk`, `obj`,
/// `fd1`, `fr1`, `vsp`, ...). Validated to be exactly three ASCII bytes so it
/// round-trips losslessly through filenames and CSV headers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeTag([u8; 3]);

impl TypeTag {
    pub const TRK: TypeTag = TypeTag(*b"trk");

    pub fn new(s: &str) -> Result<Self, TypesError> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii) {
            return Err(TypesError::InvalidTypeTag(s.to_string()));
        }
        let mut buf = [0u8; 3];
        buf.copy_from_slice(bytes);
        Ok(TypeTag(buf))
    }

    pub fn as_str(&self) -> &str {
        // Safe: constructed only from validated ASCII bytes.
        std::str::from_utf8(&self.0).unwrap()
    }
}

impl TryFrom<String> for TypeTag {
    type Error = TypesError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        TypeTag::new(&s)
    }
}

impl From<TypeTag> for String {
    fn from(t: TypeTag) -> String {
        t.as_str().to_string()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = TypesError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::new(s)
    }
}

/// Opaque event identifier, unique within a calendar day.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    pub fn new(s: impl Into<String>) -> Result<Self, TypesError> {
        let s = s.into();
        if s.is_empty() {
            return Err(TypesError::EmptyEventId);
        }
        Ok(EventId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

/// Camera frame dimensions. Constant per view; also used to select a ring
/// buffer model by size.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CamSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for CamSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned bounding box in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// One bounding-box record within a tracking set.
///
/// Column order on disk is fixed as `rect_x1, rect_y1, rect_x2, rect_y2`.
/// See DESIGN.md's resolution of the source's ambiguous column ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub timestamp: DateTime<Utc>,
    pub object_id: i64,
    pub classname: String,
    pub rect: Rect,
}

/// One row of a calendar day's date index: one `(event, type)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DateIndexRow {
    pub node: String,
    pub view: String,
    pub timestamp: DateTime<Utc>,
    pub event_id: EventId,
    pub camsize: CamSize,
    pub type_tag: TypeTag,
}

/// Selects which timeline of frames to feed into a ring buffer: every
/// captured JPEG, or only frames referenced by a given tracking set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RingCtrl {
    Full,
    Type(TypeTag),
}

impl RingCtrl {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            RingCtrl::Full => TypeTag::TRK,
            RingCtrl::Type(t) => *t,
        }
    }
}

impl TryFrom<String> for RingCtrl {
    type Error = TypesError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "full" {
            Ok(RingCtrl::Full)
        } else {
            TypeTag::new(&s)
                .map(RingCtrl::Type)
                .map_err(|_| TypesError::InvalidRingCtrl(s))
        }
    }
}

impl From<RingCtrl> for String {
    fn from(r: RingCtrl) -> String {
        match r {
            RingCtrl::Full => "full".to_string(),
            RingCtrl::Type(t) => t.as_str().to_string(),
        }
    }
}

impl fmt::Debug for RingCtrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingCtrl::Full => f.write_str("full"),
            RingCtrl::Type(t) => write!(f, "type({t})"),
        }
    }
}

/// The `(node, view, event_id, type_tag)` tuple a CSV-writer record targets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsvRef {
    pub node: String,
    pub view: String,
    pub event_id: EventId,
    pub type_tag: TypeTag,
}

/// A tagged variant replacing the source's loosely-typed `{evt: ...}` map,
/// discriminated at the ingress boundary (camwatcher's log-message parser).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "evt", rename_all = "lowercase")]
pub enum TrackingMessage {
    Start {
        id: EventId,
        view: String,
        fps: f64,
        camsize: CamSize,
    },
    Trk {
        id: EventId,
        view: String,
        obj: i64,
        clas: String,
        rect: Rect,
        timestamp: DateTime<Utc>,
    },
    End {
        id: EventId,
        view: String,
    },
}

/// Hex-formatted job identifier assigned by the scheduler at submission.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({self})")
    }
}

/// Integer label restricting which engines may execute a task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobClass(pub u32);

impl fmt::Debug for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class({})", self.0)
    }
}

/// A job submission as received by the scheduler's control REP socket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRequest {
    pub task: String,
    pub date: String,
    /// `None` for a pure analytic task with no associated event/image stream.
    pub event: Option<EventId>,
    pub sink: Option<String>,
    pub node: Option<String>,
    pub pump: Option<String>,
}

/// The per-frame analytic result a task publishes from inside its pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub jobid: JobId,
    pub refkey: TypeTag,
    pub ringctrl: RingCtrl,
    pub start: DateTime<Utc>,
    pub offset: u32,
    pub clas: String,
    pub rect: Rect,
}

/// `STATUS` payload: either free text or a structured per-frame result.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusPayload {
    Frame(FrameResult),
    Text(String),
}

/// The envelope a task engine publishes on its per-process result PUB, one
/// of `{STATUS, STARTED, DONE, FAIL, CANCELED, BOMB}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EngineEnvelope {
    Status { jobid: JobId, payload: StatusPayload },
    Started { jobid: JobId },
    Done { jobid: JobId, image_count: u64 },
    Fail { jobid: JobId, reason: String },
    Canceled { jobid: JobId },
    Bomb { engine: String },
}

/// Job-manager lifecycle bracket published around engine activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleFlag {
    Submit,
    Start,
    Stop,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub flag: LifecycleFlag,
    pub jobid: JobId,
    pub task: String,
    pub source_node: Option<String>,
    pub date: Option<String>,
    pub event_id: Option<EventId>,
}

/// What the scheduler publishes on its unified result PUB (topic
/// `Sentinel.<LEVEL>`), consumed by camwatcher's analytics subscriber.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SchedulerMessage {
    Lifecycle(LifecycleEvent),
    Frame { jobid: JobId, result: FrameResult },
    Text(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_rejects_wrong_length() {
        assert!(TypeTag::new("tr").is_err());
        assert!(TypeTag::new("track").is_err());
        assert!(TypeTag::new("trk").is_ok());
    }

    #[test]
    fn ringctrl_round_trips_through_string() {
        let full = RingCtrl::Full;
        let s: String = full.into();
        assert_eq!(s, "full");
        let back: RingCtrl = String::from("full").try_into().unwrap();
        assert_eq!(back, RingCtrl::Full);

        let typed: RingCtrl = String::from("obj").try_into().unwrap();
        assert_eq!(typed.type_tag(), TypeTag::new("obj").unwrap());
    }

    #[test]
    fn tracking_message_tags_on_evt_field() {
        let json = r#"{"evt":"start","id":"E1","view":"front","fps":15.0,"camsize":{"width":640,"height":360}}"#;
        let msg: TrackingMessage = serde_json::from_str(json).unwrap();
        match msg {
            TrackingMessage::Start { id, .. } => assert_eq!(id.as_str(), "E1"),
            _ => panic!("wrong variant"),
        }
    }
}
