//! Error type for the dispatcher's external-facing operations. Grounded on `shared/src/error.rs`.

use model::{DroneId, LocationId, RequestId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown drone: {0}")]
    UnknownDrone(DroneId),
    #[error("unknown request: {0}")]
    UnknownRequest(RequestId),
    #[error("unknown location: {0}")]
    UnknownLocation(LocationId),
    #[error("unknown patient: {0}")]
    UnknownPatient(String),
    #[error("payload must contain at least one item")]
    EmptyPayload,
    #[error("unrecognized triage class: {0}")]
    InvalidPriority(String),
    #[error(transparent)]
    Graph(#[from] graph::GraphError),
}
