//! The `dat`/`idx`/`evt`/`img`/`pic`/`del`/`HC` request/reply contract.

use sentinelcam_types::EventId;
use serde::{Deserialize, Serialize};

fn default_trk() -> String {
    "trk".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum DatapumpRequest {
    #[serde(rename = "dat")]
    Dat,
    #[serde(rename = "idx")]
    Idx { date: String },
    #[serde(rename = "evt")]
    Evt {
        date: String,
        evt: EventId,
        #[serde(default = "default_trk")]
        trk: String,
    },
    #[serde(rename = "img")]
    Img { date: String, evt: EventId },
    #[serde(rename = "pic")]
    Pic {
        date: String,
        evt: EventId,
        frametime: String,
    },
    #[serde(rename = "del")]
    Del { date: String, evt: EventId },
    #[serde(rename = "HC")]
    Hc,
}

/// The reply to a [`DatapumpRequest`]. The enum discriminant *is* the
/// `{"msg": <code>}` metadata header from the spec; the variant's payload
/// is the data frame that would otherwise follow it. CBOR already frames
/// tagged enums self-describingly, so one enum value serves both roles
/// instead of literally writing two wire frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DatapumpResponse {
    Dates(Vec<String>),
    /// Columnar-encoded [`sentinelcam_wire::table::Table`] bytes.
    Index(Vec<u8>),
    /// Columnar-encoded [`sentinelcam_wire::table::Table`] bytes, including
    /// the derived `elapsed` column.
    Events(Vec<u8>),
    /// Frame timestamps, chronological, nanoseconds since the Unix epoch.
    Images(Vec<i64>),
    Picture(Vec<u8>),
    Deleted,
    HealthOk,
    TrackingSetEmpty,
    ImageSetEmpty,
    Error(String),
}
