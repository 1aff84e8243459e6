//! IO modules - external system interfaces
//!
//! - `ap_store` - access point repository (SQLite, in-memory)
//! - `importer` - CSV survey exports → SQLite
//! - `webhook` - TTN uplink JSON model
//! - `http` - webhook, history and metrics endpoints
//! - `mqtt` - TTN MQTT uplink subscriber
//! - `prometheus` - Prometheus text rendering

pub mod ap_store;
pub mod http;
pub mod importer;
pub mod mqtt;
pub mod prometheus;
pub mod webhook;

pub use ap_store::{AccessPointRepository, InMemoryRepository, RepositoryError, SqliteRepository};
pub use importer::{DuplicatePolicy, ImportError, ImportFormat, ImportOptions, ImportReport};
pub use webhook::TtnUplink;
