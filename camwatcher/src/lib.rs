//! Ingest service: collects outpost tracking/image streams, persists them to
//! the CSV/image stores, and captures post-event analytic results.

pub mod analytics;
pub mod config;
pub mod control;
pub mod csv_service;
pub mod csv_writer;
pub mod dispatcher;
pub mod imgwriter;
pub mod registry;

pub use config::CamwatcherConfig;
