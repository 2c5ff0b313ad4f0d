use crate::nexus::TimeStep;
use thiserror::Error;

/// Error type for invalid operations.
///
/// Construction-time variants (`MissingParameters`, `UnknownFormulationType`,
/// `InvalidParameter`) are fatal to startup and name the offending node.
/// Protocol-time variants are fatal to a run: they indicate either a topology
/// defect or a misconfigured percentage split, and masking them would silently
/// break the conservation guarantee.
#[derive(Error, Debug)]
pub enum HydronetError {
    #[error("A configuration for '{id}' cannot be created; the following parameters are missing: {}", .missing.join(", "))]
    MissingParameters { id: String, missing: Vec<String> },
    #[error("No registered formulation type was found for '{id}'")]
    UnknownFormulationType { id: String },
    #[error("Invalid parameter for '{id}': {message}")]
    InvalidParameter { id: String, message: String },
    #[error("Nexus '{id}': timestep {timestep} is before the watermark {watermark}")]
    StaleTimestep {
        id: String,
        timestep: TimeStep,
        watermark: TimeStep,
    },
    #[error("Nexus '{id}': timestep {timestep} has already been completed")]
    TimestepCompleted { id: String, timestep: TimeStep },
    #[error("Nexus '{id}': cannot add water at timestep {timestep} once flows have been summed")]
    LedgerClosed { id: String, timestep: TimeStep },
    #[error("Nexus '{id}': cannot release water at timestep {timestep} before any has been deposited")]
    EmptyLedger { id: String, timestep: TimeStep },
    #[error("Nexus '{id}': downstream requests at timestep {timestep} cannot exceed 100% of flux ({granted}% granted, {requested}% requested)")]
    OverAllocation {
        id: String,
        timestep: TimeStep,
        granted: f64,
        requested: f64,
    },
    #[error("Unknown node id '{id}'")]
    LookupError { id: String },
    #[error("Invalid network topology at '{id}': {message}")]
    InvalidTopology { id: String, message: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type for `Result<T, HydronetError>`.
pub type HydronetResult<T> = Result<T, HydronetError>;
