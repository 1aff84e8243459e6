//! Services - the uplink processing core
//!
//! - `decoder` - payload → ordered observations
//! - `estimator` - signal-weighted centroid
//! - `history` - bounded FIFO of position estimates
//! - `pipeline` - composes the above for each uplink

pub mod decoder;
pub mod estimator;
pub mod history;
pub mod pipeline;

pub use estimator::PositionEstimator;
pub use history::{HistoryBuffer, HistorySnapshot};
pub use pipeline::{IngestOutcome, IngestResponse, IngestStatus, IngestionPipeline, PipelineError};
