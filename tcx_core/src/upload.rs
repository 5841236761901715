//! Upload orchestration: dedup against history, pace, delegate, record.
//!
//! Per activity: `Pending -> DuplicateSkip` or `Pending -> Uploading ->
//! Uploaded | Failed`. Authentication happens once per batch and its
//! failure aborts the batch before any upload is attempted. A failed
//! upload is not recorded, so the next run retries it.

use crate::activity_type::ActivitySubtype;
use crate::history::UploadHistory;
use crate::rate_limit::{CancelToken, Clock, RateLimiter};
use crate::tcx::BuiltDocument;
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Destination account credentials
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the uploader is asked to deliver
#[derive(Clone, Debug)]
pub struct UploadRequest<'a> {
    pub activity_id: &'a str,
    pub path: &'a Path,
    pub activity_type: ActivitySubtype,
    pub title: &'a str,
}

/// Destination transport
pub trait ActivityUploader {
    /// Fails with `Error::DestinationAuth` when the destination rejects us
    fn authenticate(&mut self, credentials: &Credentials) -> Result<()>;
    fn upload(&mut self, request: &UploadRequest<'_>) -> Result<()>;
}

/// A document written to disk and waiting to be delivered
#[derive(Clone, Debug, PartialEq)]
pub struct PendingUpload {
    pub activity_id: String,
    pub title: String,
    pub path: PathBuf,
    pub activity_type: ActivitySubtype,
}

impl PendingUpload {
    pub fn from_built(document: &BuiltDocument, path: PathBuf) -> Self {
        Self {
            activity_id: document.activity_id.clone(),
            title: document.title.clone(),
            path,
            activity_type: document.activity_type.subtype,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UploadStatus {
    Uploaded,
    DuplicateSkip,
    Failed(String),
    /// The batch was cancelled before this activity was reached
    NotAttempted,
}

#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub activity_id: String,
    pub title: String,
    pub status: UploadStatus,
}

/// Per-activity results of one batch
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<UploadOutcome>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&UploadStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|s| *s == UploadStatus::Uploaded)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == UploadStatus::DuplicateSkip)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, UploadStatus::Failed(_)))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|s| *s == UploadStatus::NotAttempted)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} already uploaded, {} failed",
            self.uploaded(),
            self.skipped(),
            self.failed()
        )?;
        if self.not_attempted() > 0 {
            write!(f, ", {} not attempted", self.not_attempted())?;
        }
        Ok(())
    }
}

/// Drives one batch of uploads through history, rate limiter and uploader
pub struct UploadOrchestrator<'a, H, U, C>
where
    H: UploadHistory,
    U: ActivityUploader,
    C: Clock,
{
    history: &'a mut H,
    uploader: &'a mut U,
    limiter: RateLimiter<C>,
}

impl<'a, H, U, C> UploadOrchestrator<'a, H, U, C>
where
    H: UploadHistory,
    U: ActivityUploader,
    C: Clock,
{
    pub fn new(history: &'a mut H, uploader: &'a mut U, limiter: RateLimiter<C>) -> Self {
        Self {
            history,
            uploader,
            limiter,
        }
    }

    /// Upload every item not already in history.
    ///
    /// Only authentication failure is returned as an error; everything else
    /// is reported per activity.
    pub fn run(
        &mut self,
        credentials: &Credentials,
        items: &[PendingUpload],
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        if items.is_empty() {
            tracing::info!("Nothing to upload");
            return Ok(report);
        }

        tracing::info!("Authenticating with destination");
        self.uploader.authenticate(credentials).map_err(|e| match e {
            Error::DestinationAuth(_) => e,
            other => Error::DestinationAuth(other.to_string()),
        })?;

        for (index, item) in items.iter().enumerate() {
            let _span = tracing::info_span!("upload", workout_id = %item.activity_id).entered();

            let status = match self.upload_one(item, cancel) {
                Err(Error::Cancelled) => {
                    tracing::warn!("Upload batch cancelled");
                    report.outcomes.extend(items[index..].iter().map(|i| UploadOutcome {
                        activity_id: i.activity_id.clone(),
                        title: i.title.clone(),
                        status: UploadStatus::NotAttempted,
                    }));
                    break;
                }
                Err(e) => {
                    tracing::error!("Upload of {} failed: {}", item.activity_id, e);
                    UploadStatus::Failed(e.to_string())
                }
                Ok(status) => status,
            };

            report.outcomes.push(UploadOutcome {
                activity_id: item.activity_id.clone(),
                title: item.title.clone(),
                status,
            });
        }

        tracing::info!("Upload batch finished: {}", report);
        Ok(report)
    }

    fn upload_one(&mut self, item: &PendingUpload, cancel: &CancelToken) -> Result<UploadStatus> {
        if self.history.has(&item.activity_id)? {
            tracing::info!("Workout {} already uploaded, skipping", item.activity_id);
            return Ok(UploadStatus::DuplicateSkip);
        }

        self.limiter.acquire(cancel)?;

        tracing::info!("Uploading {} ({})", item.title, item.activity_type);
        self.uploader.upload(&UploadRequest {
            activity_id: &item.activity_id,
            path: &item.path,
            activity_type: item.activity_type,
            title: &item.title,
        })?;

        self.history
            .record(&item.activity_id, &item.title, Utc::now())
            .map_err(|e| {
                Error::History(format!("uploaded but failed to record history: {e}"))
            })?;
        Ok(UploadStatus::Uploaded)
    }
}

/// `ActivityUploader` that runs an external upload command per file:
/// `<program> -u <email> -p <password> -a <activity type> -t <title> <path>`
pub struct CommandUploader {
    program: String,
    credentials: Option<Credentials>,
}

impl CommandUploader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            credentials: None,
        }
    }
}

impl ActivityUploader for CommandUploader {
    fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        if !credentials.is_complete() {
            return Err(Error::DestinationAuth(
                "destination email and password are required".into(),
            ));
        }
        self.credentials = Some(credentials.clone());
        Ok(())
    }

    fn upload(&mut self, request: &UploadRequest<'_>) -> Result<()> {
        let transport_error = |reason: String| Error::UploadTransport {
            activity_id: request.activity_id.to_string(),
            reason,
        };
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| transport_error("not authenticated".into()))?;

        let output = Command::new(&self.program)
            .arg("-u")
            .arg(&credentials.email)
            .arg("-p")
            .arg(&credentials.password)
            .arg("-a")
            .arg(request.activity_type.as_str())
            .arg("-t")
            .arg(request.title)
            .arg(request.path)
            .output()
            .map_err(|e| transport_error(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(transport_error(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
