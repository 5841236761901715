#![forbid(unsafe_code)]

//! Core of the tcxsync workout transcoder.
//!
//! This crate provides:
//! - Raw workout payloads and the `WorkoutSource` seam
//! - Unit conversion and activity type mapping
//! - The Training Center XML document builder
//! - Upload history, rate limiting and upload orchestration
//! - The batch pipeline tying them together

pub mod error;
pub mod units;
pub mod activity_type;
pub mod source;
pub mod canonical;
pub mod descriptor;
pub mod tcx;
pub mod history;
pub mod rate_limit;
pub mod upload;
pub mod pipeline;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{Error, Result};
pub use activity_type::{map_activity_type, ActivitySubtype, ActivityType, Discipline, Sport};
pub use config::Config;
pub use descriptor::WorkoutDescriptor;
pub use history::{JsonlHistory, UploadHistory, UploadRecord};
pub use pipeline::{convert_bundle, upload_converted, SyncOptions, SyncPipeline, SyncReport};
pub use rate_limit::{CancelToken, RateLimiter};
pub use source::{JsonDirSource, WorkoutBundle, WorkoutSource};
pub use tcx::{build, BuiltDocument};
pub use upload::{ActivityUploader, BatchReport, CommandUploader, Credentials, UploadOrchestrator};
