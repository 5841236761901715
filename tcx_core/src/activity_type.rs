//! Mapping from the source's fitness discipline onto the destination's
//! coarse sport and fine-grained activity type vocabularies.

use std::fmt;

/// Fitness discipline as labelled by the workout source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Discipline {
    Cycling,
    BikeBootcamp,
    Running,
    Walking,
    Cardio,
    Circuit,
    Strength,
    Stretching,
    Yoga,
    Meditation,
    /// Any label we don't know about
    Other,
}

impl Discipline {
    /// Parse a source label. Unrecognised labels become `Discipline::Other`.
    pub fn from_source(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "cycling" => Discipline::Cycling,
            "bike_bootcamp" => Discipline::BikeBootcamp,
            "running" => Discipline::Running,
            "walking" => Discipline::Walking,
            "cardio" => Discipline::Cardio,
            "circuit" => Discipline::Circuit,
            "strength" => Discipline::Strength,
            "stretching" => Discipline::Stretching,
            "yoga" => Discipline::Yoga,
            "meditation" => Discipline::Meditation,
            _ => Discipline::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Discipline::Cycling => "cycling",
            Discipline::BikeBootcamp => "bike_bootcamp",
            Discipline::Running => "running",
            Discipline::Walking => "walking",
            Discipline::Cardio => "cardio",
            Discipline::Circuit => "circuit",
            Discipline::Strength => "strength",
            Discipline::Stretching => "stretching",
            Discipline::Yoga => "yoga",
            Discipline::Meditation => "meditation",
            Discipline::Other => "other",
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse sport written to the `Activity/@Sport` attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sport {
    Biking,
    Running,
    Other,
}

impl Sport {
    pub fn as_str(self) -> &'static str {
        match self {
            Sport::Biking => "Biking",
            Sport::Running => "Running",
            Sport::Other => "Other",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained destination activity type handed to the uploader
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivitySubtype {
    IndoorCycling,
    TreadmillRunning,
    Walking,
    IndoorCardio,
    StrengthTraining,
    Yoga,
    Breathwork,
    Other,
}

impl ActivitySubtype {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivitySubtype::IndoorCycling => "indoor_cycling",
            ActivitySubtype::TreadmillRunning => "treadmill_running",
            ActivitySubtype::Walking => "walking",
            ActivitySubtype::IndoorCardio => "indoor_cardio",
            ActivitySubtype::StrengthTraining => "strength_training",
            ActivitySubtype::Yoga => "yoga",
            ActivitySubtype::Breathwork => "breathwork",
            ActivitySubtype::Other => "other",
        }
    }
}

impl fmt::Display for ActivitySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved destination activity type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivityType {
    pub sport: Sport,
    pub subtype: ActivitySubtype,
}

/// Map a discipline onto the destination's sport and subtype.
///
/// Total: every discipline, including `Other`, has an entry. Adding a
/// `Discipline` variant without a row here fails to compile.
pub fn map_activity_type(discipline: Discipline) -> ActivityType {
    let (sport, subtype) = match discipline {
        Discipline::Cycling | Discipline::BikeBootcamp => {
            (Sport::Biking, ActivitySubtype::IndoorCycling)
        }
        Discipline::Running => (Sport::Running, ActivitySubtype::TreadmillRunning),
        Discipline::Walking => (Sport::Running, ActivitySubtype::Walking),
        Discipline::Cardio | Discipline::Circuit | Discipline::Stretching => {
            (Sport::Other, ActivitySubtype::IndoorCardio)
        }
        Discipline::Strength => (Sport::Other, ActivitySubtype::StrengthTraining),
        Discipline::Yoga => (Sport::Other, ActivitySubtype::Yoga),
        Discipline::Meditation => (Sport::Other, ActivitySubtype::Breathwork),
        Discipline::Other => (Sport::Other, ActivitySubtype::Other),
    };
    ActivityType { sport, subtype }
}

/// Convenience wrapper for raw source labels
pub fn map_discipline_label(label: &str) -> ActivityType {
    map_activity_type(Discipline::from_source(label))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: [&str; 10] = [
        "cycling",
        "bike_bootcamp",
        "running",
        "walking",
        "cardio",
        "circuit",
        "strength",
        "stretching",
        "yoga",
        "meditation",
    ];

    #[test]
    fn test_known_disciplines_round_trip_labels() {
        for label in KNOWN {
            let discipline = Discipline::from_source(label);
            assert_ne!(discipline, Discipline::Other, "{label} should be known");
            assert_eq!(discipline.as_str(), label);
        }
    }

    #[test]
    fn test_cycling_maps_to_indoor_cycling() {
        let mapped = map_discipline_label("cycling");
        assert_eq!(mapped.sport, Sport::Biking);
        assert_eq!(mapped.subtype.as_str(), "indoor_cycling");
    }

    #[test]
    fn test_running_and_walking_are_running_sport() {
        assert_eq!(map_discipline_label("running").sport, Sport::Running);
        assert_eq!(map_discipline_label("walking").sport, Sport::Running);
        assert_eq!(
            map_discipline_label("walking").subtype,
            ActivitySubtype::Walking
        );
    }

    #[test]
    fn test_unknown_discipline_falls_back_to_other() {
        for label in ["pilates", "", "CYCLING_PLUS", "rowing"] {
            let mapped = map_discipline_label(label);
            assert_eq!(mapped.sport, Sport::Other);
            assert_eq!(mapped.subtype.as_str(), "other");
        }
    }

    #[test]
    fn test_label_parsing_is_case_insensitive() {
        assert_eq!(Discipline::from_source(" Yoga "), Discipline::Yoga);
    }
}
