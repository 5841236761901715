//! Distance and speed conversion into the meters / meters-per-second basis
//! used by every emitted document field.

pub const METERS_PER_KILOMETER: f64 = 1000.0;
pub const METERS_PER_MILE: f64 = 1609.34;
pub const METERS_PER_FOOT: f64 = 0.3048;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Distance unit as reported by the workout source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DistanceUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
    /// Anything the source reports that we don't recognise; passes through
    #[default]
    Unknown,
}

impl DistanceUnit {
    /// Parse a source display unit (`"mi"`, `"km"`, `"ft"`, `"m"`).
    ///
    /// Speed units (`"mph"`, `"kph"`) resolve to their distance component so
    /// they can be compared with the document's distance unit.
    pub fn from_display_unit(unit: &str) -> Self {
        match unit.trim().to_ascii_lowercase().as_str() {
            "m" | "meters" => DistanceUnit::Meters,
            "km" | "kph" | "km/h" | "kilometers" => DistanceUnit::Kilometers,
            "mi" | "mph" | "miles" => DistanceUnit::Miles,
            "ft" | "feet" => DistanceUnit::Feet,
            _ => DistanceUnit::Unknown,
        }
    }

    fn meters_per_unit(self) -> f64 {
        match self {
            DistanceUnit::Kilometers => METERS_PER_KILOMETER,
            DistanceUnit::Miles => METERS_PER_MILE,
            DistanceUnit::Feet => METERS_PER_FOOT,
            DistanceUnit::Meters | DistanceUnit::Unknown => 1.0,
        }
    }
}

/// Convert a distance in `unit` to meters.
///
/// Unknown units are treated as already in meters.
pub fn to_meters(value: f64, unit: DistanceUnit) -> f64 {
    value * unit.meters_per_unit()
}

/// Convert a speed in `unit` per hour to meters per second.
pub fn speed_to_meters_per_second(value_per_hour: f64, unit: DistanceUnit) -> f64 {
    to_meters(value_per_hour, unit) / SECONDS_PER_HOUR
}
