//! Raw workout payloads and the `WorkoutSource` collaborator.
//!
//! The source system's records are loosely structured, so every field that
//! may be absent is an `Option` or defaults to empty. Nothing here is
//! mutated after deserialization.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Status the source reports for a finished workout
pub const STATUS_COMPLETE: &str = "COMPLETE";

// ============================================================================
// Workout
// ============================================================================

/// Top-level workout record
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWorkout {
    pub id: String,
    pub status: Option<String>,
    /// Epoch seconds
    #[serde(deserialize_with = "lenient::integer")]
    pub start_time: Option<i64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub end_time: Option<i64>,
    pub fitness_discipline: Option<String>,
    pub ride: Option<RawRide>,
}

/// Class metadata attached to a workout
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRide {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient::integer")]
    pub duration: Option<i64>,
    pub fitness_discipline: Option<String>,
    pub instructor: Option<RawInstructor>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawInstructor {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl RawInstructor {
    /// Display name, falling back to `first last` when `name` is missing
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Workout-level aggregates (`avg_heart_rate`, `max_power`, `calories`, ...)
///
/// Kept as a JSON object so that an absent aggregate and a malformed one can
/// be told apart.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSummary(pub Map<String, Value>);

impl RawSummary {
    /// Read a numeric aggregate.
    ///
    /// `Ok(None)` when the key is absent or null; `Err` with a reason when the
    /// value is present but not a number.
    pub fn number(&self, field: &str) -> std::result::Result<Option<f64>, String> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| format!("{n} is not representable as f64")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|e| format!("{s:?}: {e}")),
            Some(other) => Err(format!("expected a number, found {other}")),
        }
    }
}

// ============================================================================
// Samples
// ============================================================================

/// Per-second time series for a workout
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSamples {
    /// Offset in seconds from workout start for each sample index. An
    /// unreadable offset is `None` so later indices stay aligned.
    #[serde(deserialize_with = "lenient::integer_series")]
    pub seconds_since_pedaling_start: Vec<Option<i64>>,
    pub summaries: Vec<RawSampleSummary>,
    pub metrics: Vec<RawMetric>,
    pub location_data: Option<Vec<RawLocationSegment>>,
}

impl RawSamples {
    /// Find a metric series by slug, searching nested alternatives too
    pub fn metric(&self, slug: &str) -> Option<&RawMetric> {
        self.metrics
            .iter()
            .find(|m| m.slug == slug)
            .or_else(|| {
                self.metrics
                    .iter()
                    .flat_map(|m| m.alternatives.iter())
                    .find(|m| m.slug == slug)
            })
    }

    /// Find a whole-workout summary value by slug
    pub fn summary(&self, slug: &str) -> Option<&RawSampleSummary> {
        self.summaries.iter().find(|s| s.slug == slug)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSampleSummary {
    pub slug: String,
    pub display_unit: Option<String>,
    #[serde(deserialize_with = "lenient::number")]
    pub value: Option<f64>,
}

/// One named series (`heart_rate`, `cadence`, `speed`, `output`, ...)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMetric {
    pub slug: String,
    pub display_unit: Option<String>,
    #[serde(deserialize_with = "lenient::number_series")]
    pub values: Vec<Option<f64>>,
    #[serde(deserialize_with = "lenient::number")]
    pub max_value: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub average_value: Option<f64>,
    pub alternatives: Vec<RawMetric>,
}

/// A contiguous run of GPS fixes
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawLocationSegment {
    pub segment_id: Option<String>,
    pub is_gap: bool,
    pub coordinates: Vec<RawCoordinate>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCoordinate {
    #[serde(deserialize_with = "lenient::number")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub longitude: Option<f64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub seconds_offset_from_start: Option<i64>,
    #[serde(deserialize_with = "lenient::number")]
    pub accuracy: Option<f64>,
}

/// Field deserializers that turn unreadable values into `None` instead of
/// failing the whole payload.
mod lenient {
    use super::*;

    fn to_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
    }

    fn to_integer(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    fn items(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
        Ok(to_number(&Value::deserialize(d)?))
    }

    pub fn integer<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
        Ok(to_integer(&Value::deserialize(d)?))
    }

    pub fn number_series<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<Option<f64>>, D::Error> {
        Ok(items(Value::deserialize(d)?).iter().map(to_number).collect())
    }

    pub fn integer_series<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<Option<i64>>, D::Error> {
        Ok(items(Value::deserialize(d)?).iter().map(to_integer).collect())
    }
}

// ============================================================================
// Collaborator
// ============================================================================

/// Listing entry for a recent workout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecentWorkout {
    pub id: String,
    pub status: Option<String>,
}

impl RecentWorkout {
    /// Workouts without a status are treated as complete
    pub fn is_complete(&self) -> bool {
        self.status
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case(STATUS_COMPLETE))
    }
}

/// Supplier of raw workout payloads
///
/// Errors are fatal for the one activity being fetched only.
pub trait WorkoutSource {
    fn recent_workouts(&self, limit: usize) -> Result<Vec<RecentWorkout>>;
    fn workout(&self, id: &str) -> Result<RawWorkout>;
    fn summary(&self, id: &str) -> Result<RawSummary>;
    fn samples(&self, id: &str) -> Result<Option<RawSamples>>;
}

/// A workout with its summary and samples, as stored on disk
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkoutBundle {
    pub workout: RawWorkout,
    #[serde(default, alias = "workoutSummary")]
    pub workout_summary: RawSummary,
    #[serde(default, alias = "workoutSamples")]
    pub workout_samples: Option<RawSamples>,
}

impl WorkoutBundle {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let bundle: WorkoutBundle = serde_json::from_str(&contents)?;
        Ok(bundle)
    }
}

/// `WorkoutSource` backed by a directory of JSON bundles, one per workout
pub struct JsonDirSource {
    dir: PathBuf,
    entries: BTreeMap<String, DirEntry>,
}

enum DirEntry {
    Loaded(Box<WorkoutBundle>),
    /// A file that could not be read as a bundle. It is still listed so the
    /// batch reports it as a failure.
    Unreadable {
        start_time: Option<i64>,
        reason: String,
    },
}

impl DirEntry {
    fn start_time(&self) -> Option<i64> {
        match self {
            DirEntry::Loaded(bundle) => bundle.workout.start_time,
            DirEntry::Unreadable { start_time, .. } => *start_time,
        }
    }

    fn status(&self) -> Option<String> {
        match self {
            DirEntry::Loaded(bundle) => bundle.workout.status.clone(),
            DirEntry::Unreadable { .. } => None,
        }
    }
}

impl JsonDirSource {
    /// Load every `*.json` bundle in `dir`.
    ///
    /// A file that doesn't parse is kept under its workout id (or file stem)
    /// and fails when fetched.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut entries = BTreeMap::new();

        if !dir.exists() {
            tracing::info!("Input directory {:?} does not exist, nothing to read", dir);
            return Ok(Self { dir, entries });
        }

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let (id, entry) = load_entry(&path);
            entries.insert(id, entry);
        }

        tracing::debug!("Loaded {} workout bundles from {:?}", entries.len(), dir);
        Ok(Self { dir, entries })
    }

    fn bundle(&self, id: &str) -> Result<&WorkoutBundle> {
        match self.entries.get(id) {
            Some(DirEntry::Loaded(bundle)) => Ok(&**bundle),
            Some(DirEntry::Unreadable { reason, .. }) => Err(Error::Source {
                workout_id: id.to_string(),
                reason: reason.clone(),
            }),
            None => Err(Error::Source {
                workout_id: id.to_string(),
                reason: format!("no bundle in {:?}", self.dir),
            }),
        }
    }
}

fn load_entry(path: &Path) -> (String, DirEntry) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let value = match std::fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|contents| Ok(serde_json::from_str::<Value>(&contents)?))
    {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to load bundle {:?}: {}", path, e);
            let reason = format!("unreadable bundle {:?}: {}", path, e);
            return (stem, DirEntry::Unreadable { start_time: None, reason });
        }
    };

    let workout = &value["workout"];
    let id = workout["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or(stem);
    let start_time = workout["start_time"].as_i64();

    match serde_json::from_value::<WorkoutBundle>(value) {
        Ok(mut bundle) => {
            bundle.workout.id = id.clone();
            (id, DirEntry::Loaded(Box::new(bundle)))
        }
        Err(e) => {
            tracing::warn!("Bundle {:?} does not match the workout schema: {}", path, e);
            let reason = format!("malformed bundle {:?}: {}", path, e);
            (id, DirEntry::Unreadable { start_time, reason })
        }
    }
}

impl WorkoutSource for JsonDirSource {
    fn recent_workouts(&self, limit: usize) -> Result<Vec<RecentWorkout>> {
        let mut listed: Vec<(&String, &DirEntry)> = self.entries.iter().collect();
        // Newest first
        listed.sort_by(|a, b| b.1.start_time().cmp(&a.1.start_time()));
        Ok(listed
            .into_iter()
            .take(limit)
            .map(|(id, entry)| RecentWorkout {
                id: id.clone(),
                status: entry.status(),
            })
            .collect())
    }

    fn workout(&self, id: &str) -> Result<RawWorkout> {
        Ok(self.bundle(id)?.workout.clone())
    }

    fn summary(&self, id: &str) -> Result<RawSummary> {
        Ok(self.bundle(id)?.workout_summary.clone())
    }

    fn samples(&self, id: &str) -> Result<Option<RawSamples>> {
        Ok(self.bundle(id)?.workout_samples.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_number_distinguishes_absent_and_malformed() {
        let summary: RawSummary = serde_json::from_value(json!({
            "avg_heart_rate": 120,
            "max_power": "300",
            "calories": null,
            "max_cadence": {"oops": true}
        }))
        .unwrap();

        assert_eq!(summary.number("avg_heart_rate"), Ok(Some(120.0)));
        assert_eq!(summary.number("max_power"), Ok(Some(300.0)));
        assert_eq!(summary.number("calories"), Ok(None));
        assert_eq!(summary.number("avg_power"), Ok(None));
        assert!(summary.number("max_cadence").is_err());
    }

    #[test]
    fn test_metric_lookup_searches_alternatives() {
        let samples: RawSamples = serde_json::from_value(json!({
            "metrics": [{
                "slug": "pace",
                "values": [10.0],
                "alternatives": [{"slug": "speed", "display_unit": "mph", "values": [6.0]}]
            }]
        }))
        .unwrap();

        let speed = samples.metric("speed").expect("speed nested under pace");
        assert_eq!(speed.values, vec![Some(6.0)]);
        assert!(samples.metric("cadence").is_none());
    }

    #[test]
    fn test_instructor_display_name_fallback() {
        let named = RawInstructor {
            name: Some("Denis Morton".into()),
            ..Default::default()
        };
        assert_eq!(named.display_name().as_deref(), Some("Denis Morton"));

        let split = RawInstructor {
            name: None,
            first_name: Some("Becs".into()),
            last_name: Some("Gentry".into()),
        };
        assert_eq!(split.display_name().as_deref(), Some("Becs Gentry"));

        assert_eq!(RawInstructor::default().display_name(), None);
    }

    #[test]
    fn test_recent_workout_status() {
        let done = RecentWorkout { id: "a".into(), status: Some("COMPLETE".into()) };
        let live = RecentWorkout { id: "b".into(), status: Some("IN PROGRESS".into()) };
        let unknown = RecentWorkout { id: "c".into(), status: None };
        assert!(done.is_complete());
        assert!(!live.is_complete());
        assert!(unknown.is_complete());
    }

    #[test]
    fn test_json_dir_source_lists_newest_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        for (id, start) in [("old", 100), ("new", 300), ("mid", 200)] {
            let bundle = json!({
                "workout": {"id": id, "status": "COMPLETE", "start_time": start},
                "workout_summary": {"calories": 10},
                "workout_samples": {"seconds_since_pedaling_start": [0, 1]}
            });
            std::fs::write(
                temp_dir.path().join(format!("{id}.json")),
                bundle.to_string(),
            )
            .unwrap();
        }
        std::fs::write(temp_dir.path().join("junk.json"), "not json").unwrap();

        let source = JsonDirSource::open(temp_dir.path()).unwrap();
        let recent = source.recent_workouts(2).unwrap();
        let ids: Vec<_> = recent.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);

        let samples = source.samples("old").unwrap().unwrap();
        assert_eq!(samples.seconds_since_pedaling_start, vec![Some(0), Some(1)]);
        assert!(matches!(source.workout("missing"), Err(Error::Source { .. })));
    }

    #[test]
    fn test_unreadable_bundles_are_listed_and_fail_on_fetch() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("junk.json"), "not json").unwrap();
        let wrong_shape = json!({
            "workout": {"id": "w9", "status": "COMPLETE", "start_time": 500, "ride": "oops"}
        });
        std::fs::write(temp_dir.path().join("renamed.json"), wrong_shape.to_string()).unwrap();

        let source = JsonDirSource::open(temp_dir.path()).unwrap();
        let recent = source.recent_workouts(10).unwrap();
        let ids: Vec<_> = recent.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["w9", "junk"]);

        let err = source.workout("w9").unwrap_err();
        assert!(matches!(err, Error::Source { ref reason, .. } if reason.contains("malformed")));
        assert!(matches!(source.summary("junk"), Err(Error::Source { .. })));
    }

    #[test]
    fn test_bad_sample_values_become_gaps() {
        let samples: RawSamples = serde_json::from_value(json!({
            "seconds_since_pedaling_start": [0, "1", null, 3],
            "summaries": [{"slug": "distance", "display_unit": "mi", "value": "n/a"}],
            "metrics": [{
                "slug": "heart_rate",
                "values": [120, "n/a", 130, {"x": 1}],
                "max_value": "141",
                "average_value": true
            }, {
                "slug": "cadence",
                "values": "unavailable"
            }],
            "location_data": [{"coordinates": [
                {"latitude": null, "longitude": -73.0, "seconds_offset_from_start": 0}
            ]}]
        }))
        .unwrap();

        assert_eq!(
            samples.seconds_since_pedaling_start,
            vec![Some(0), Some(1), None, Some(3)]
        );
        let hr = samples.metric("heart_rate").unwrap();
        assert_eq!(hr.values, vec![Some(120.0), None, Some(130.0), None]);
        assert_eq!(hr.max_value, Some(141.0));
        assert_eq!(hr.average_value, None);
        assert!(samples.metric("cadence").unwrap().values.is_empty());
        assert_eq!(samples.summary("distance").unwrap().value, None);

        let coordinate = &samples.location_data.as_ref().unwrap()[0].coordinates[0];
        assert_eq!(coordinate.latitude, None);
        assert_eq!(coordinate.seconds_offset_from_start, Some(0));
    }

    #[test]
    fn test_bundle_accepts_camel_case_sections() {
        let bundle: WorkoutBundle = serde_json::from_value(json!({
            "workout": {"id": "w1"},
            "workoutSummary": {"calories": 5},
            "workoutSamples": null
        }))
        .unwrap();
        assert_eq!(bundle.workout_summary.number("calories"), Ok(Some(5.0)));
        assert!(bundle.workout_samples.is_none());
    }
}
