//! Uplink ingestion pipeline
//!
//! decode → resolve (blocking worker) → estimate → append.
//!
//! The history append is the final step, so every early return and every
//! error leaves the history untouched.

use crate::domain::types::UplinkObservation;
use crate::infra::metrics::{Metrics, UplinkOutcome};
use crate::io::ap_store::{AccessPointRepository, RepositoryError};
use crate::services::decoder;
use crate::services::estimator::{Estimate, PositionEstimator};
use crate::services::history::HistoryBuffer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// A position was estimated and appended
    Success,
    /// Nothing usable in the uplink; history unchanged
    NoData,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Success => "success",
            IngestStatus::NoData => "no_data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    /// History size after processing
    pub history_size: usize,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("lookup worker failed: {0}")]
    Worker(String),
}

/// JSON body returned to the webhook caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub history_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn from_outcome(outcome: &IngestOutcome) -> Self {
        Self { status: outcome.status.as_str(), history_size: outcome.history_size, error: None }
    }

    pub fn error(message: impl Into<String>, history_size: usize) -> Self {
        Self { status: "error", history_size, error: Some(message.into()) }
    }
}

/// Composes decoder, repository, estimator and history for each uplink.
/// Cheap to clone; clones share the same history and repository.
#[derive(Clone)]
pub struct IngestionPipeline {
    repository: Arc<dyn AccessPointRepository>,
    estimator: PositionEstimator,
    history: Arc<HistoryBuffer>,
    metrics: Arc<Metrics>,
}

impl IngestionPipeline {
    pub fn new(
        repository: Arc<dyn AccessPointRepository>,
        history: Arc<HistoryBuffer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { repository, estimator: PositionEstimator::new(), history, metrics }
    }

    pub fn history(&self) -> &Arc<HistoryBuffer> {
        &self.history
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Process one uplink end to end
    pub async fn process(&self, uplink: UplinkObservation) -> Result<IngestOutcome, PipelineError> {
        let start = Instant::now();
        let result = self.run(uplink).await;

        let outcome = match &result {
            Ok(o) if o.status == IngestStatus::Success => UplinkOutcome::Success,
            Ok(_) => UplinkOutcome::NoData,
            Err(_) => UplinkOutcome::Failed,
        };
        self.metrics.record_uplink(outcome, start.elapsed().as_micros() as u64);
        result
    }

    async fn run(&self, uplink: UplinkObservation) -> Result<IngestOutcome, PipelineError> {
        let UplinkObservation { device_id, received_at, payload } = uplink;

        let Some(payload) = payload else {
            debug!(device_id = %device_id, reason = "no_payload", "uplink_no_data");
            return Ok(self.no_data());
        };

        let decoded = decoder::decode(&payload);
        self.metrics.record_decoded(decoded.observations.len(), decoded.diagnostics.len());
        for diagnostic in &decoded.diagnostics {
            warn!(
                device_id = %device_id,
                kind = diagnostic.as_str(),
                detail = %diagnostic,
                "decode_diagnostic"
            );
        }

        if decoded.observations.is_empty() {
            debug!(device_id = %device_id, reason = "no_observations", "uplink_no_data");
            return Ok(self.no_data());
        }

        let observed = decoded.observations.len();
        let repository = Arc::clone(&self.repository);
        let observations = decoded.observations;
        let resolved = tokio::task::spawn_blocking(move || repository.resolve(&observations))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;
        self.metrics.record_resolved(resolved.len());

        match self.estimator.estimate(&resolved, received_at) {
            Estimate::Located(position) => {
                let (lat, lon, aps_count) = (position.lat, position.lon, position.aps_count);
                let history_size = self.history.append(position);
                self.metrics.observe_history_size(history_size);
                info!(
                    device_id = %device_id,
                    lat = lat,
                    lon = lon,
                    aps_count = aps_count,
                    observed = observed,
                    history_size = history_size,
                    "position_estimated"
                );
                Ok(IngestOutcome { status: IngestStatus::Success, history_size })
            }
            Estimate::NoEstimate(reason) => {
                debug!(
                    device_id = %device_id,
                    observed = observed,
                    resolved = resolved.len(),
                    reason = reason.as_str(),
                    "uplink_no_data"
                );
                Ok(self.no_data())
            }
        }
    }

    fn no_data(&self) -> IngestOutcome {
        IngestOutcome { status: IngestStatus::NoData, history_size: self.history.len() }
    }
}
