//! Error taxonomy (§7). Stage helpers never throw to the orchestrator; they
//! return `Result<_, PipelineError>`, and the orchestrator's top-level call
//! converts any residual error into a `ProcessingResult` instead of
//! propagating it further.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage}: not found: {message}")]
    NotFound { stage: &'static str, message: String },

    #[error("{stage}: confidence below threshold: {message}")]
    LowConfidence { stage: &'static str, message: String },

    #[error("{stage}: validation failed: {message}")]
    ValidationFailure { stage: &'static str, message: String },

    #[error("{stage}: conflicting write: {message}")]
    ConflictingWrite { stage: &'static str, message: String },

    #[error("{stage}: external dependency unavailable: {message}")]
    ExternalUnavailable { stage: &'static str, message: String },

    #[error("{stage}: data integrity violation: {message}")]
    DataIntegrity { stage: &'static str, message: String },

    #[error("{stage}: {message}")]
    UnknownFailure { stage: &'static str, message: String },
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::NotFound { stage, .. }
            | PipelineError::LowConfidence { stage, .. }
            | PipelineError::ValidationFailure { stage, .. }
            | PipelineError::ConflictingWrite { stage, .. }
            | PipelineError::ExternalUnavailable { stage, .. }
            | PipelineError::DataIntegrity { stage, .. }
            | PipelineError::UnknownFailure { stage, .. } => stage,
        }
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound { stage, message: message.into() }
    }

    pub fn validation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::ValidationFailure { stage, message: message.into() }
    }

    pub fn data_integrity(stage: &'static str, message: impl Into<String>) -> Self {
        Self::DataIntegrity { stage, message: message.into() }
    }

    pub fn unknown(stage: &'static str, message: impl Into<String>) -> Self {
        Self::UnknownFailure { stage, message: message.into() }
    }
}

impl From<WorkflowError> for PipelineError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Store(store_err) => store_err.into(),
            WorkflowError::InvalidTransition { .. } => {
                PipelineError::ValidationFailure { stage: "workflow", message: err.to_string() }
            }
            other => PipelineError::UnknownFailure { stage: "workflow", message: other.to_string() },
        }
    }
}

impl From<ShipmentStoreError> for PipelineError {
    fn from(err: ShipmentStoreError) -> Self {
        match err {
            ShipmentStoreError::NotFound => {
                PipelineError::not_found("store", "record not found")
            }
            ShipmentStoreError::DuplicateBooking(ref booking) => PipelineError::ConflictingWrite {
                stage: "store",
                message: format!("booking number {booking} already exists"),
            },
            other => PipelineError::ExternalUnavailable {
                stage: "store",
                message: other.to_string(),
            },
        }
    }
}

/// Errors from the persistence layer (`store/`). Separate from
/// `PipelineError` because a store is reusable outside the orchestrator
/// (e.g. by backfill scripts), and callers need the unique-constraint
/// case (`DuplicateBooking`) distinguished so they can retry as an update.
#[derive(Debug, thiserror::Error)]
pub enum ShipmentStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("missing database url")]
    MissingDbUrl,
    #[error("record not found")]
    NotFound,
    #[error("booking number {0} already exists")]
    DuplicateBooking(String),
    #[error("config error: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("shipment {shipment_id} has no workflow state configured")]
    NoCurrentState { shipment_id: Uuid },
    #[error(
        "invalid transition for shipment {shipment_id}: {from} -> {to} (allowed: {allowed:?})"
    )]
    InvalidTransition {
        shipment_id: Uuid,
        from: String,
        to: String,
        allowed: Vec<String>,
    },
    #[error("unknown workflow state code: {0}")]
    UnknownState(String),
    #[error(transparent)]
    Store(#[from] ShipmentStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_accessor_matches_every_variant() {
        let err = PipelineError::validation("workflow", "bad transition");
        assert_eq!(err.stage(), "workflow");
    }
}
