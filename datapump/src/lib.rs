pub mod config;
pub mod protocol;
pub mod purge_worker;
pub mod service;

pub use config::DatapumpConfig;
pub use protocol::{DatapumpRequest, DatapumpResponse};
pub use service::DatapumpService;
