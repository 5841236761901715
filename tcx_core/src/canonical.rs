//! Normalized view of one workout, built once from the raw payloads.
//!
//! Every series is independently optional. A series that is present may
//! still be shorter than the offset array or contain nulls; lookups return
//! `None` for those indices and the caller omits the field.

use crate::activity_type::Discipline;
use crate::source::{RawMetric, RawSamples, RawWorkout};
use crate::units::DistanceUnit;
use crate::{Error, Result};
use std::collections::BTreeMap;

pub const SLUG_HEART_RATE: &str = "heart_rate";
pub const SLUG_CADENCE: &str = "cadence";
pub const SLUG_SPEED: &str = "speed";
pub const SLUG_OUTPUT: &str = "output";
pub const SLUG_RESISTANCE: &str = "resistance";
pub const SLUG_ALTITUDE: &str = "altitude";
pub const SLUG_DISTANCE: &str = "distance";

/// One per-sample series aligned with the offset array
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Series {
    pub values: Vec<Option<f64>>,
    pub unit: DistanceUnit,
}

impl Series {
    fn from_metric(metric: &RawMetric) -> Self {
        Self {
            values: metric.values.clone(),
            unit: metric
                .display_unit
                .as_deref()
                .map(DistanceUnit::from_display_unit)
                .unwrap_or_default(),
        }
    }

    /// Value at `index`, or `None` when out of range or null
    pub fn at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug)]
pub struct CanonicalWorkout {
    pub id: String,
    /// Epoch seconds
    pub start_time: i64,
    /// Seconds
    pub duration: Option<i64>,
    pub title: String,
    pub instructor: Option<String>,
    pub description: Option<String>,
    pub discipline: Discipline,
    /// The single unit basis for every distance and speed in the document
    pub distance_unit: DistanceUnit,
    /// Total distance in `distance_unit`
    pub total_distance: Option<f64>,
    /// Offsets from start in seconds, in source order; `None` where the
    /// source value was unreadable
    pub offsets: Vec<Option<i64>>,
    pub heart_rate: Option<Series>,
    pub cadence: Option<Series>,
    pub speed: Option<Series>,
    pub output: Option<Series>,
    pub resistance: Option<Series>,
    pub altitude: Option<Series>,
    /// GPS fixes flattened across segments, keyed by offset
    pub positions: Option<BTreeMap<i64, GeoPoint>>,
}

impl CanonicalWorkout {
    pub fn from_raw(workout: &RawWorkout, samples: &RawSamples) -> Result<Self> {
        let start_time = workout.start_time.ok_or_else(|| Error::LapAggregateParse {
            workout_id: workout.id.clone(),
            field: "start_time".into(),
            reason: "workout has no start time".into(),
        })?;

        let ride = workout.ride.clone().unwrap_or_default();
        let discipline_label = workout
            .fitness_discipline
            .as_deref()
            .or(ride.fitness_discipline.as_deref())
            .unwrap_or_default();

        let duration = ride
            .duration
            .or_else(|| workout.end_time.and_then(|end| end.checked_sub(start_time)))
            .or_else(|| {
                samples
                    .seconds_since_pedaling_start
                    .iter()
                    .rev()
                    .find_map(|offset| *offset)
            });

        let distance_summary = samples.summary(SLUG_DISTANCE);
        let distance_unit = distance_summary
            .and_then(|s| s.display_unit.as_deref())
            .map(DistanceUnit::from_display_unit)
            .unwrap_or_default();
        if distance_summary.is_none() {
            tracing::debug!("No distance summary for workout {}", workout.id);
        }

        let speed = samples.metric(SLUG_SPEED).map(Series::from_metric);
        if let Some(speed) = &speed {
            if speed.unit != DistanceUnit::Unknown
                && distance_unit != DistanceUnit::Unknown
                && speed.unit != distance_unit
            {
                tracing::warn!(
                    "Workout {}: speed reported in {:?} but distance in {:?}; using {:?}",
                    workout.id,
                    speed.unit,
                    distance_unit,
                    distance_unit
                );
            }
        }

        Ok(Self {
            id: workout.id.clone(),
            start_time,
            duration,
            title: ride.title.clone().unwrap_or_else(|| workout.id.clone()),
            instructor: ride.instructor.as_ref().and_then(|i| i.display_name()),
            description: ride.description.clone().filter(|d| !d.trim().is_empty()),
            discipline: Discipline::from_source(discipline_label),
            distance_unit,
            total_distance: distance_summary.and_then(|s| s.value),
            offsets: samples.seconds_since_pedaling_start.clone(),
            heart_rate: samples.metric(SLUG_HEART_RATE).map(Series::from_metric),
            cadence: samples.metric(SLUG_CADENCE).map(Series::from_metric),
            speed,
            output: samples.metric(SLUG_OUTPUT).map(Series::from_metric),
            resistance: samples.metric(SLUG_RESISTANCE).map(Series::from_metric),
            altitude: samples.metric(SLUG_ALTITUDE).map(Series::from_metric),
            positions: flatten_positions(samples),
        })
    }
}

fn flatten_positions(samples: &RawSamples) -> Option<BTreeMap<i64, GeoPoint>> {
    let segments = samples.location_data.as_ref()?;
    let positions: BTreeMap<i64, GeoPoint> = segments
        .iter()
        .flat_map(|segment| segment.coordinates.iter())
        .filter_map(|c| {
            let point = GeoPoint {
                latitude: c.latitude?,
                longitude: c.longitude?,
            };
            Some((c.seconds_offset_from_start?, point))
        })
        .collect();
    (!positions.is_empty()).then_some(positions)
}
