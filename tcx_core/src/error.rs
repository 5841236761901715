//! Error types for the tcx_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tcx_core operations
///
/// Variants are grouped by how far they propagate: activity-level errors
/// (`MissingSampleData`, `LapAggregateParse`, `Source`, `UploadTransport`)
/// are caught by the batch loop, while `DestinationAuth` and `Cancelled`
/// end the batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// XML writer error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The workout has no sample payload, so no document can be built
    #[error("Workout {workout_id} has no sample data")]
    MissingSampleData { workout_id: String },

    /// A lap aggregate was present but could not be read as a number
    #[error("Workout {workout_id}: failed to parse lap aggregate `{field}`: {reason}")]
    LapAggregateParse {
        workout_id: String,
        field: String,
        reason: String,
    },

    /// The workout source failed to supply one activity
    #[error("Workout {workout_id}: source error: {reason}")]
    Source { workout_id: String, reason: String },

    /// Authentication against the destination failed; fatal for the batch
    #[error("Destination authentication failed: {0}")]
    DestinationAuth(String),

    /// Transport of one activity to the destination failed
    #[error("Upload of {activity_id} failed: {reason}")]
    UploadTransport { activity_id: String, reason: String },

    /// Upload history store error
    #[error("History error: {0}")]
    History(String),

    /// The surrounding process asked us to stop
    #[error("Operation cancelled")]
    Cancelled,
}
