//! Brokerless wire transport shared by `camwatcher`, `datapump`, and
//! `sentinel`: length-prefixed CBOR framing, request/reply, topic-filtered
//! pub/sub, an ASCII `command|json` control line, and a columnar table
//! encoding for tabular query results.

pub mod control;
pub mod framing;
pub mod pubsub;
pub mod reqrep;
pub mod table;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR decode error: {0}")]
    Decode(#[from] serde_cbor::Error),
    #[error("frame of {0} bytes exceeds the maximum allowed frame size")]
    FrameTooLarge(usize),
    #[error("request timed out waiting for a reply")]
    Timeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("malformed command line: {0:?}")]
    MalformedCommand(String),
    #[error("malformed table encoding: {0}")]
    BadTable(String),
}
