//! Cheap summary of a workout, read before samples and summary are fetched.

use crate::activity_type::Discipline;
use crate::source::RawWorkout;
use chrono::{DateTime, Utc};
use std::fmt;

/// Minimal, stable view of a workout used for filtering and tracing
#[derive(Clone, Debug, PartialEq)]
pub struct WorkoutDescriptor {
    pub id: String,
    pub title: String,
    pub instructor: String,
    pub discipline: Discipline,
    /// Source discipline label, trimmed and lowercased
    pub discipline_label: String,
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkoutDescriptor {
    /// Extract a descriptor. Missing ride or instructor metadata becomes an
    /// empty string.
    pub fn extract(workout: &RawWorkout) -> Self {
        let ride = workout.ride.as_ref();
        let title = ride
            .and_then(|r| r.title.clone())
            .unwrap_or_default();
        let instructor = ride
            .and_then(|r| r.instructor.as_ref())
            .and_then(|i| i.display_name())
            .unwrap_or_default();
        let discipline_label = workout
            .fitness_discipline
            .as_deref()
            .or_else(|| ride.and_then(|r| r.fitness_discipline.as_deref()))
            .map(normalize_label)
            .unwrap_or_default();
        let discipline = Discipline::from_source(&discipline_label);
        let started_at = workout
            .start_time
            .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));

        Self {
            id: workout.id.clone(),
            title,
            instructor,
            discipline,
            discipline_label,
            started_at,
        }
    }

    /// True when the caller asked to skip this workout's discipline.
    ///
    /// Matches on the source label, so excluding one unrecognised
    /// discipline leaves other unrecognised ones alone.
    pub fn is_excluded(&self, excluded: &[String]) -> bool {
        !self.discipline_label.is_empty()
            && excluded
                .iter()
                .any(|label| normalize_label(label) == self.discipline_label)
    }
}

/// Trim and lowercase a discipline label for comparison
pub fn normalize_label(label: &str) -> String {
    label.trim().to_ascii_lowercase()
}

impl fmt::Display for WorkoutDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let started = self
            .started_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown start".into());
        write!(f, "[{}] {} {} \"{}\"", self.id, started, self.discipline, self.title)?;
        if !self.instructor.is_empty() {
            write!(f, " with {}", self.instructor)?;
        }
        Ok(())
    }
}
