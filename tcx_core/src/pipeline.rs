//! Batch run: list, fetch, build, write, then optionally upload.
//!
//! Fetching is sequential against the source. Document builds share no
//! state and run on the rayon pool. Uploads go through a single
//! `UploadOrchestrator` in listing order. A failure while fetching or
//! building one activity never stops the others.

use crate::config::Config;
use crate::descriptor::WorkoutDescriptor;
use crate::history::UploadHistory;
use crate::rate_limit::{CancelToken, Clock, RateLimiter};
use crate::source::{RawSamples, RawSummary, RawWorkout, WorkoutBundle, WorkoutSource};
use crate::tcx::{self, BuiltDocument};
use crate::upload::{ActivityUploader, BatchReport, Credentials, PendingUpload, UploadOrchestrator};
use crate::Result;
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};

/// Settings for one batch run
#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub num_activities: usize,
    /// Discipline labels to skip
    pub exclude_disciplines: Vec<String>,
    pub output_dir: PathBuf,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_activities: config.source.num_activities,
            exclude_disciplines: config.source.exclude_disciplines.clone(),
            output_dir: config.output.directory.clone(),
        }
    }
}

/// An activity left out of the batch on purpose
#[derive(Clone, Debug, PartialEq)]
pub struct Skipped {
    pub activity_id: String,
    pub reason: String,
}

/// An activity that could not be converted
#[derive(Clone, Debug, PartialEq)]
pub struct Failed {
    pub activity_id: String,
    pub reason: String,
}

/// Outcome of a batch run
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Written documents, in listing order
    pub converted: Vec<PendingUpload>,
    pub skipped: Vec<Skipped>,
    pub failed: Vec<Failed>,
    /// Present only when an upload pass ran
    pub uploads: Option<BatchReport>,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} converted, {} skipped, {} failed",
            self.converted.len(),
            self.skipped.len(),
            self.failed.len()
        )?;
        if let Some(uploads) = &self.uploads {
            write!(f, "; {}", uploads)?;
        }
        Ok(())
    }
}

/// Everything needed to build one document
struct Fetched {
    descriptor: WorkoutDescriptor,
    workout: RawWorkout,
    summary: RawSummary,
    samples: Option<RawSamples>,
}

/// Fetch outcome for one listed workout
enum Fetch {
    Ready(Box<Fetched>),
    Skip(String),
}

pub struct SyncPipeline<'a, S: WorkoutSource> {
    source: &'a S,
    options: SyncOptions,
}

impl<'a, S: WorkoutSource> SyncPipeline<'a, S> {
    pub fn new(source: &'a S, options: SyncOptions) -> Self {
        Self { source, options }
    }

    /// Convert the most recent workouts and write their documents.
    ///
    /// Only a failure to list workouts is returned as an error.
    pub fn convert(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let recent = self.source.recent_workouts(self.options.num_activities)?;
        tracing::info!("Found {} recent workouts", recent.len());

        let mut fetched = Vec::new();
        for entry in &recent {
            let _span = tracing::info_span!("fetch", workout_id = %entry.id).entered();

            if !entry.is_complete() {
                let status = entry.status.as_deref().unwrap_or_default();
                tracing::info!("Workout {} is {}, skipping", entry.id, status);
                report.skipped.push(Skipped {
                    activity_id: entry.id.clone(),
                    reason: format!("status {status}"),
                });
                continue;
            }

            match self.fetch(&entry.id) {
                Ok(Fetch::Ready(item)) => fetched.push(*item),
                Ok(Fetch::Skip(reason)) => report.skipped.push(Skipped {
                    activity_id: entry.id.clone(),
                    reason,
                }),
                Err(e) => {
                    tracing::error!("Failed to fetch workout {}: {}", entry.id, e);
                    report.failed.push(Failed {
                        activity_id: entry.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let built: Vec<(String, Result<BuiltDocument>)> = fetched
            .par_iter()
            .map(|item| {
                let result = tcx::build(&item.workout, &item.summary, item.samples.as_ref());
                (item.descriptor.id.clone(), result)
            })
            .collect();

        for (activity_id, result) in built {
            let _span = tracing::info_span!("write", workout_id = %activity_id).entered();
            match result.and_then(|doc| write_document(&doc, &self.options.output_dir)) {
                Ok(pending) => report.converted.push(pending),
                Err(e) => {
                    tracing::error!("Failed to convert workout {}: {}", activity_id, e);
                    report.failed.push(Failed {
                        activity_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Conversion finished: {}", report);
        Ok(report)
    }

    fn fetch(&self, id: &str) -> Result<Fetch> {
        let workout = self.source.workout(id)?;
        let descriptor = WorkoutDescriptor::extract(&workout);
        tracing::info!("Get workout: {}", descriptor);

        if descriptor.is_excluded(&self.options.exclude_disciplines) {
            tracing::info!("Workout {} is {}, excluded", id, descriptor.discipline_label);
            return Ok(Fetch::Skip(format!(
                "discipline {} excluded",
                descriptor.discipline_label
            )));
        }

        let summary = self.source.summary(id)?;
        let samples = self.source.samples(id)?;
        Ok(Fetch::Ready(Box::new(Fetched {
            descriptor,
            workout,
            summary,
            samples,
        })))
    }
}

/// Upload the converted documents of `report`, storing the batch result on it.
///
/// Destination authentication failure is returned as an error; written
/// files stay on disk for the next run.
pub fn upload_converted<H, U, C>(
    report: &mut SyncReport,
    history: &mut H,
    uploader: &mut U,
    limiter: RateLimiter<C>,
    credentials: &Credentials,
    cancel: &CancelToken,
) -> Result<()>
where
    H: UploadHistory,
    U: ActivityUploader,
    C: Clock,
{
    let batch = UploadOrchestrator::new(history, uploader, limiter).run(
        credentials,
        &report.converted,
        cancel,
    )?;
    report.uploads = Some(batch);
    Ok(())
}

/// Build and write the document for a single bundle
pub fn convert_bundle(bundle: &WorkoutBundle, output_dir: &Path) -> Result<PendingUpload> {
    let _span = tracing::info_span!("convert", workout_id = %bundle.workout.id).entered();
    let document = tcx::build(
        &bundle.workout,
        &bundle.workout_summary,
        bundle.workout_samples.as_ref(),
    )?;
    write_document(&document, output_dir)
}

fn write_document(document: &BuiltDocument, output_dir: &Path) -> Result<PendingUpload> {
    let path = document.write_to(output_dir)?;
    Ok(PendingUpload::from_built(document, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::rate_limit::ManualClock;
    use crate::source::RecentWorkout;
    use crate::upload::UploadRequest;
    use crate::Error;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Source backed by a map of bundles, newest first by start time
    #[derive(Default)]
    struct MemorySource {
        bundles: BTreeMap<String, WorkoutBundle>,
        broken_summaries: Vec<String>,
    }

    impl MemorySource {
        fn with(mut self, bundle: Value) -> Self {
            let bundle: WorkoutBundle = serde_json::from_value(bundle).unwrap();
            self.bundles.insert(bundle.workout.id.clone(), bundle);
            self
        }

        fn get(&self, id: &str) -> Result<&WorkoutBundle> {
            self.bundles.get(id).ok_or_else(|| Error::Source {
                workout_id: id.into(),
                reason: "unknown".into(),
            })
        }
    }

    impl WorkoutSource for MemorySource {
        fn recent_workouts(&self, limit: usize) -> Result<Vec<RecentWorkout>> {
            let mut all: Vec<_> = self.bundles.values().map(|b| &b.workout).collect();
            all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            Ok(all
                .into_iter()
                .take(limit)
                .map(|w| RecentWorkout {
                    id: w.id.clone(),
                    status: w.status.clone(),
                })
                .collect())
        }

        fn workout(&self, id: &str) -> Result<RawWorkout> {
            Ok(self.get(id)?.workout.clone())
        }

        fn summary(&self, id: &str) -> Result<RawSummary> {
            if self.broken_summaries.iter().any(|b| b == id) {
                return Err(Error::Source {
                    workout_id: id.into(),
                    reason: "HTTP 500".into(),
                });
            }
            Ok(self.get(id)?.workout_summary.clone())
        }

        fn samples(&self, id: &str) -> Result<Option<RawSamples>> {
            Ok(self.get(id)?.workout_samples.clone())
        }
    }

    fn bundle(id: &str, start: i64, discipline: &str, status: &str) -> Value {
        json!({
            "workout": {
                "id": id,
                "status": status,
                "start_time": start,
                "fitness_discipline": discipline,
                "ride": {
                    "title": format!("Class {id}"),
                    "duration": 600,
                    "instructor": {"name": "Jess King"}
                }
            },
            "workout_summary": {"avg_heart_rate": 130, "calories": 200},
            "workout_samples": {
                "seconds_since_pedaling_start": [0, 1, 2],
                "summaries": [{"slug": "distance", "display_unit": "km", "value": 3.0}],
                "metrics": [{"slug": "heart_rate", "values": [120, 130, 140]}]
            }
        })
    }

    fn options(dir: &Path) -> SyncOptions {
        SyncOptions {
            num_activities: 10,
            exclude_disciplines: Vec::new(),
            output_dir: dir.to_path_buf(),
        }
    }

    fn ids(items: &[PendingUpload]) -> Vec<&str> {
        items.iter().map(|p| p.activity_id.as_str()).collect()
    }

    #[test]
    fn test_converts_recent_workouts_in_listing_order() {
        crate::logging::init_test();
        let temp_dir = tempfile::tempdir().unwrap();
        let source = MemorySource::default()
            .with(bundle("a", 100, "cycling", "COMPLETE"))
            .with(bundle("b", 300, "running", "COMPLETE"))
            .with(bundle("c", 200, "yoga", "COMPLETE"));

        let report = SyncPipeline::new(&source, options(temp_dir.path()))
            .convert()
            .unwrap();

        assert_eq!(ids(&report.converted), vec!["b", "c", "a"]);
        assert!(report.failed.is_empty());
        for pending in &report.converted {
            assert!(pending.path.exists());
            assert!(pending.path.starts_with(temp_dir.path()));
        }
        assert_eq!(report.converted[0].title, "Class b with Jess King");
    }

    #[test]
    fn test_limit_applies_before_filtering() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = MemorySource::default()
            .with(bundle("a", 100, "cycling", "COMPLETE"))
            .with(bundle("b", 200, "cycling", "COMPLETE"));
        let mut opts = options(temp_dir.path());
        opts.num_activities = 1;

        let report = SyncPipeline::new(&source, opts).convert().unwrap();
        assert_eq!(ids(&report.converted), vec!["b"]);
    }

    #[test]
    fn test_skips_incomplete_and_excluded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = MemorySource::default()
            .with(bundle("live", 300, "cycling", "IN_PROGRESS"))
            .with(bundle("zen", 200, "meditation", "COMPLETE"))
            .with(bundle("ride", 100, "cycling", "COMPLETE"));
        let mut opts = options(temp_dir.path());
        opts.exclude_disciplines = vec!["meditation".into()];

        let report = SyncPipeline::new(&source, opts).convert().unwrap();

        assert_eq!(ids(&report.converted), vec!["ride"]);
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.activity_id.as_str()).collect();
        assert_eq!(skipped, vec!["live", "zen"]);
        assert!(report.skipped[1].reason.contains("meditation"));
    }

    #[test]
    fn test_one_failure_does_not_stop_the_batch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut no_samples = bundle("empty", 300, "cycling", "COMPLETE");
        no_samples["workout_samples"] = Value::Null;
        let mut bad_aggregate = bundle("bad", 250, "cycling", "COMPLETE");
        bad_aggregate["workout_summary"]["avg_heart_rate"] = json!({"nope": 1});

        let mut source = MemorySource::default()
            .with(no_samples)
            .with(bad_aggregate)
            .with(bundle("flaky", 200, "cycling", "COMPLETE"))
            .with(bundle("good", 100, "cycling", "COMPLETE"));
        source.broken_summaries.push("flaky".into());

        let report = SyncPipeline::new(&source, options(temp_dir.path()))
            .convert()
            .unwrap();

        assert_eq!(ids(&report.converted), vec!["good"]);
        let failed: Vec<_> = report.failed.iter().map(|f| f.activity_id.as_str()).collect();
        assert_eq!(failed, vec!["flaky", "empty", "bad"]);
        assert_eq!(report.to_string(), "1 converted, 0 skipped, 3 failed");
    }

    #[test]
    fn test_directory_run_tolerates_bad_values_and_reports_bad_bundles() {
        use crate::source::JsonDirSource;

        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let mut gappy = bundle("gappy", 200, "cycling", "COMPLETE");
        gappy["workout_samples"]["metrics"][0]["values"] = json!([120, "n/a", 130]);
        std::fs::write(input.path().join("gappy.json"), gappy.to_string()).unwrap();
        let mut wrong_shape = bundle("broken", 100, "cycling", "COMPLETE");
        wrong_shape["workout"]["ride"] = json!("oops");
        std::fs::write(input.path().join("broken.json"), wrong_shape.to_string()).unwrap();

        let source = JsonDirSource::open(input.path()).unwrap();
        let report = SyncPipeline::new(&source, options(output.path()))
            .convert()
            .unwrap();

        assert_eq!(ids(&report.converted), vec!["gappy"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].activity_id, "broken");
        assert!(report.failed[0].reason.contains("malformed"));

        let xml = std::fs::read_to_string(&report.converted[0].path).unwrap();
        assert_eq!(xml.matches("<Trackpoint>").count(), 3);
        assert_eq!(xml.matches("<HeartRateBpm>").count(), 2);
    }

    #[derive(Default)]
    struct AcceptingUploader {
        reject: bool,
        uploaded: Vec<String>,
    }

    impl ActivityUploader for AcceptingUploader {
        fn authenticate(&mut self, _credentials: &Credentials) -> Result<()> {
            if self.reject {
                return Err(Error::DestinationAuth("bad password".into()));
            }
            Ok(())
        }

        fn upload(&mut self, request: &UploadRequest<'_>) -> Result<()> {
            assert!(request.path.exists());
            self.uploaded.push(request.activity_id.to_string());
            Ok(())
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            email: "rider@example.com".into(),
            password: "pw".into(),
        }
    }

    #[test]
    fn test_convert_then_upload_dedups_across_runs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = MemorySource::default()
            .with(bundle("a", 100, "cycling", "COMPLETE"))
            .with(bundle("b", 200, "walking", "COMPLETE"));
        let pipeline = SyncPipeline::new(&source, options(temp_dir.path()));
        let clock = Arc::new(ManualClock::new());
        let mut history = MemoryHistory::new();
        let mut uploader = AcceptingUploader::default();

        for _ in 0..2 {
            let mut report = pipeline.convert().unwrap();
            let limiter = RateLimiter::with_clock(Duration::from_secs(2), Arc::clone(&clock));
            upload_converted(
                &mut report,
                &mut history,
                &mut uploader,
                limiter,
                &credentials(),
                &CancelToken::new(),
            )
            .unwrap();
            assert!(report.uploads.is_some());
        }

        assert_eq!(uploader.uploaded, vec!["b", "a"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_auth_failure_keeps_written_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = MemorySource::default().with(bundle("a", 100, "cycling", "COMPLETE"));
        let mut report = SyncPipeline::new(&source, options(temp_dir.path()))
            .convert()
            .unwrap();
        let mut history = MemoryHistory::new();
        let mut uploader = AcceptingUploader {
            reject: true,
            ..Default::default()
        };

        let err = upload_converted(
            &mut report,
            &mut history,
            &mut uploader,
            RateLimiter::with_clock(Duration::from_secs(1), ManualClock::new()),
            &credentials(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::DestinationAuth(_)));
        assert!(report.uploads.is_none());
        assert!(report.converted[0].path.exists());
        assert!(history.is_empty());
    }

    #[test]
    fn test_convert_bundle_writes_one_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let bundle: WorkoutBundle =
            serde_json::from_value(bundle("solo", 1_586_208_689, "running", "COMPLETE")).unwrap();

        let pending = convert_bundle(&bundle, temp_dir.path()).unwrap();
        assert_eq!(
            pending.path.file_name().unwrap().to_str().unwrap(),
            "1586208689-Class solo with Jess King-solo.tcx"
        );
        let xml = std::fs::read_to_string(&pending.path).unwrap();
        assert!(xml.contains("<Activity Sport=\"Running\">"));
    }
}
