//! Training Center XML document builder.
//!
//! Builds an in-memory `TcxDocument` from a workout, its summary and its
//! samples, then serializes it with the namespace set and element order
//! consumers expect. Two failure policies apply:
//!
//! - Lap header: a malformed aggregate aborts the whole document. A missing
//!   aggregate is logged and its element omitted.
//! - Track points: any per-series lookup failure omits that one field from
//!   that one point.

use crate::activity_type::{map_activity_type, ActivityType, Sport};
use crate::canonical::{CanonicalWorkout, GeoPoint, Series, SLUG_SPEED};
use crate::source::{RawSamples, RawSummary, RawWorkout};
use crate::units::{speed_to_meters_per_second, to_meters, DistanceUnit};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const NS_TRAINING_CENTER: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2";
pub const NS_ACTIVITY_EXTENSION: &str = "http://www.garmin.com/xmlschemas/ActivityExtension/v2";
pub const NS_PROFILE_EXTENSION: &str = "http://www.garmin.com/xmlschemas/ProfileExtension/v1";
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const SCHEMA_LOCATION: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2 \
     http://www.garmin.com/xmlschemas/TrainingCenterDatabasev2.xsd";

pub const FILE_EXTENSION: &str = "tcx";

// ============================================================================
// Document tree
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct TcxDocument {
    pub activity: TcxActivity,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TcxActivity {
    pub sport: Sport,
    /// Start timestamp, doubles as the activity id
    pub id: String,
    pub notes: Option<String>,
    pub lap: TcxLap,
}

/// The single lap of an activity. Optional fields are omitted, never zeroed.
#[derive(Clone, Debug, PartialEq)]
pub struct TcxLap {
    pub start_time: String,
    pub total_time_seconds: Option<i64>,
    pub distance_meters: Option<f64>,
    pub maximum_speed: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub maximum_heart_rate: Option<f64>,
    pub calories: Option<f64>,
    pub extensions: LapExtensions,
    pub track: Vec<TrackPoint>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LapExtensions {
    pub avg_speed: Option<f64>,
    pub max_bike_cadence: Option<f64>,
    pub avg_cadence: Option<f64>,
    pub avg_watts: Option<f64>,
    pub max_watts: Option<f64>,
    pub avg_resistance: Option<f64>,
    pub max_resistance: Option<f64>,
    pub total_work: Option<f64>,
}

impl LapExtensions {
    fn is_empty(&self) -> bool {
        *self == LapExtensions::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackPoint {
    pub offset: i64,
    pub time: String,
    pub position: Option<GeoPoint>,
    pub altitude_meters: Option<f64>,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub speed: Option<f64>,
    pub watts: Option<f64>,
    pub resistance: Option<f64>,
}

/// A built document plus the names it will be published under
#[derive(Clone, Debug)]
pub struct BuiltDocument {
    pub activity_id: String,
    pub title: String,
    pub filename: String,
    pub activity_type: ActivityType,
    pub document: TcxDocument,
}

// ============================================================================
// Titles and filenames
// ============================================================================

/// Transliterate to ASCII and replace path-unsafe characters with `-`
pub fn normalize_title(raw: &str) -> String {
    deunicode::deunicode(raw)
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<title>[ with <instructor>]`, both parts normalized
pub fn compose_title(title: &str, instructor: Option<&str>) -> String {
    let mut composed = normalize_title(title);
    if let Some(name) = instructor.map(normalize_title).filter(|n| !n.is_empty()) {
        composed.push_str(" with ");
        composed.push_str(&name);
    }
    composed
}

/// `<start>-<title>-<id>.tcx`; a pure function of its inputs
pub fn compose_filename(start_time: i64, title: &str, activity_id: &str) -> String {
    format!("{start_time}-{title}-{activity_id}.{FILE_EXTENSION}")
}

fn timestamp(epoch_seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S.000Z").to_string())
}

// ============================================================================
// Build
// ============================================================================

/// Build the document for one workout.
///
/// Fails with `MissingSampleData` when `samples` is absent and with
/// `LapAggregateParse` when a lap aggregate is malformed.
pub fn build(
    workout: &RawWorkout,
    summary: &RawSummary,
    samples: Option<&RawSamples>,
) -> Result<BuiltDocument> {
    let _span = tracing::debug_span!("build", workout_id = %workout.id).entered();

    let samples = samples.ok_or_else(|| Error::MissingSampleData {
        workout_id: workout.id.clone(),
    })?;

    let canonical = CanonicalWorkout::from_raw(workout, samples)?;
    let activity_type = map_activity_type(canonical.discipline);
    let start_time = timestamp(canonical.start_time).ok_or_else(|| Error::LapAggregateParse {
        workout_id: canonical.id.clone(),
        field: "start_time".into(),
        reason: format!("{} is out of range", canonical.start_time),
    })?;

    let mut lap = build_lap_header(&canonical, summary, samples, start_time.clone())?;
    lap.track = build_track(&canonical);

    let title = compose_title(&canonical.title, canonical.instructor.as_deref());
    let filename = compose_filename(canonical.start_time, &title, &canonical.id);

    tracing::debug!(
        "Built document {} with {} track points",
        filename,
        lap.track.len()
    );

    Ok(BuiltDocument {
        activity_id: canonical.id.clone(),
        title,
        filename,
        activity_type,
        document: TcxDocument {
            activity: TcxActivity {
                sport: activity_type.sport,
                id: start_time,
                notes: canonical.description.clone(),
                lap,
            },
        },
    })
}

/// Reads lap aggregates out of the workout summary
struct Aggregates<'a> {
    workout_id: &'a str,
    summary: &'a RawSummary,
}

impl Aggregates<'_> {
    fn get(&self, field: &str) -> Result<Option<f64>> {
        match self.summary.number(field) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                tracing::warn!(
                    "Workout {}: summary has no `{}`, omitting it",
                    self.workout_id,
                    field
                );
                Ok(None)
            }
            Err(reason) => Err(Error::LapAggregateParse {
                workout_id: self.workout_id.to_string(),
                field: field.to_string(),
                reason,
            }),
        }
    }
}

fn build_lap_header(
    canonical: &CanonicalWorkout,
    summary: &RawSummary,
    samples: &RawSamples,
    start_time: String,
) -> Result<TcxLap> {
    let agg = Aggregates {
        workout_id: &canonical.id,
        summary,
    };
    let unit = canonical.distance_unit;
    let speed = |v: f64| speed_to_meters_per_second(v, unit);

    let speed_metric = samples.metric(SLUG_SPEED);
    let maximum_speed = agg
        .get("max_speed")?
        .or_else(|| speed_metric.and_then(|m| m.max_value))
        .map(speed);
    let avg_speed = agg
        .get("avg_speed")?
        .or_else(|| speed_metric.and_then(|m| m.average_value))
        .map(speed);
    let calories = agg
        .get("calories")?
        .or_else(|| samples.summary("calories").and_then(|s| s.value));

    if canonical.total_distance.is_none() {
        tracing::warn!("Workout {}: no total distance, omitting it", canonical.id);
    }
    if canonical.duration.is_none() {
        tracing::warn!("Workout {}: no duration, omitting it", canonical.id);
    }

    Ok(TcxLap {
        start_time,
        total_time_seconds: canonical.duration,
        distance_meters: canonical.total_distance.map(|d| to_meters(d, unit)),
        maximum_speed,
        average_heart_rate: agg.get("avg_heart_rate")?,
        maximum_heart_rate: agg.get("max_heart_rate")?,
        calories,
        extensions: LapExtensions {
            avg_speed,
            max_bike_cadence: agg.get("max_cadence")?,
            avg_cadence: agg.get("avg_cadence")?,
            avg_watts: agg.get("avg_power")?,
            max_watts: agg.get("max_power")?,
            avg_resistance: agg.get("avg_resistance")?,
            max_resistance: agg.get("max_resistance")?,
            total_work: agg.get("total_work")?,
        },
        track: Vec::new(),
    })
}

fn lookup(series: Option<&Series>, index: usize, field: &str, offset: i64) -> Option<f64> {
    let series = series?;
    let value = series.at(index);
    if value.is_none() {
        tracing::debug!("No {} sample at offset {}, omitting", field, offset);
    }
    value
}

fn build_track(canonical: &CanonicalWorkout) -> Vec<TrackPoint> {
    let unit = canonical.distance_unit;
    let mut points = Vec::with_capacity(canonical.offsets.len());
    let mut last_offset: Option<i64> = None;

    for (index, &offset) in canonical.offsets.iter().enumerate() {
        let Some(offset) = offset else {
            tracing::warn!(
                "Workout {}: unreadable offset at index {}, dropping point",
                canonical.id,
                index
            );
            continue;
        };
        if last_offset.is_some_and(|last| offset <= last) {
            tracing::warn!(
                "Workout {}: offset {} at index {} is not increasing, dropping point",
                canonical.id,
                offset,
                index
            );
            continue;
        }
        let Some(time) = canonical
            .start_time
            .checked_add(offset)
            .and_then(timestamp)
        else {
            tracing::warn!("Workout {}: offset {} out of range", canonical.id, offset);
            continue;
        };
        last_offset = Some(offset);

        let altitude_meters = canonical.altitude.as_ref().and_then(|series| {
            let altitude_unit = match series.unit {
                DistanceUnit::Unknown => DistanceUnit::Meters,
                u => u,
            };
            lookup(Some(series), index, "altitude", offset).map(|v| to_meters(v, altitude_unit))
        });

        points.push(TrackPoint {
            offset,
            time,
            position: canonical
                .positions
                .as_ref()
                .and_then(|p| p.get(&offset).copied()),
            altitude_meters,
            heart_rate: lookup(canonical.heart_rate.as_ref(), index, "heart_rate", offset),
            cadence: lookup(canonical.cadence.as_ref(), index, "cadence", offset),
            speed: lookup(canonical.speed.as_ref(), index, "speed", offset)
                .map(|v| speed_to_meters_per_second(v, unit)),
            watts: lookup(canonical.output.as_ref(), index, "output", offset),
            resistance: lookup(canonical.resistance.as_ref(), index, "resistance", offset),
        });
    }

    points
}

// ============================================================================
// Serialization
// ============================================================================

fn whole(value: f64) -> String {
    format!("{value:.0}")
}

fn tenths(value: f64) -> String {
    format!("{value:.1}")
}

fn plain(value: f64) -> String {
    format!("{value}")
}

fn ext(name: &str) -> String {
    format!("ns3:{name}")
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::Start(BytesStart::new(name)))?;
        Ok(())
    }

    fn start_with(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn text(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(name)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn optional(&mut self, name: &str, value: Option<f64>, format: fn(f64) -> String) -> Result<()> {
        match value {
            Some(v) => self.text(name, &format(v)),
            None => Ok(()),
        }
    }

    /// `<name><Value>v</Value></name>`
    fn wrapped_value(&mut self, name: &str, value: Option<f64>) -> Result<()> {
        if let Some(v) = value {
            self.start(name)?;
            self.text("Value", &whole(v))?;
            self.end(name)?;
        }
        Ok(())
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.writer.into_inner()).into_owned()
    }
}

impl TcxDocument {
    /// Serialize with the XML declaration and namespace set
    pub fn to_xml(&self) -> Result<String> {
        let mut out = XmlOut::new();
        out.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        out.start_with(
            "TrainingCenterDatabase",
            &[
                ("xsi:schemaLocation", SCHEMA_LOCATION),
                ("xmlns:ns3", NS_ACTIVITY_EXTENSION),
                ("xmlns", NS_TRAINING_CENTER),
                ("xmlns:xsi", NS_XSI),
                ("xmlns:ns4", NS_PROFILE_EXTENSION),
            ],
        )?;
        out.start("Activities")?;
        self.activity.write(&mut out)?;
        out.end("Activities")?;
        out.end("TrainingCenterDatabase")?;

        Ok(out.finish())
    }
}

impl TcxActivity {
    fn write(&self, out: &mut XmlOut) -> Result<()> {
        out.start_with("Activity", &[("Sport", self.sport.as_str())])?;
        out.text("Id", &self.id)?;
        if let Some(notes) = &self.notes {
            out.text("Notes", notes)?;
        }
        self.lap.write(out)?;
        out.end("Activity")
    }
}

impl TcxLap {
    fn write(&self, out: &mut XmlOut) -> Result<()> {
        out.start_with("Lap", &[("StartTime", self.start_time.as_str())])?;
        if let Some(total) = self.total_time_seconds {
            out.text("TotalTimeSeconds", &total.to_string())?;
        }
        out.optional("DistanceMeters", self.distance_meters, tenths)?;
        out.optional("MaximumSpeed", self.maximum_speed, plain)?;
        out.wrapped_value("AverageHeartRateBpm", self.average_heart_rate)?;
        out.wrapped_value("MaximumHeartRateBpm", self.maximum_heart_rate)?;
        out.optional("Calories", self.calories, whole)?;
        out.text("Intensity", "Active")?;
        out.text("TriggerMethod", "Manual")?;

        if !self.extensions.is_empty() {
            let e = &self.extensions;
            out.start("Extensions")?;
            out.start(&ext("LX"))?;
            out.optional(&ext("AvgSpeed"), e.avg_speed, plain)?;
            out.optional(&ext("MaxBikeCadence"), e.max_bike_cadence, whole)?;
            out.optional(&ext("AvgCadence"), e.avg_cadence, whole)?;
            out.optional(&ext("AvgWatts"), e.avg_watts, whole)?;
            out.optional(&ext("MaxWatts"), e.max_watts, whole)?;
            out.optional(&ext("AvgResistance"), e.avg_resistance, whole)?;
            out.optional(&ext("MaxResistance"), e.max_resistance, whole)?;
            out.optional(&ext("TotalWork"), e.total_work, whole)?;
            out.end(&ext("LX"))?;
            out.end("Extensions")?;
        }

        out.start("Track")?;
        for point in &self.track {
            point.write(out)?;
        }
        out.end("Track")?;
        out.end("Lap")
    }
}

impl TrackPoint {
    fn write(&self, out: &mut XmlOut) -> Result<()> {
        out.start("Trackpoint")?;
        out.text("Time", &self.time)?;
        if let Some(position) = self.position {
            out.start("Position")?;
            out.text("LatitudeDegrees", &plain(position.latitude))?;
            out.text("LongitudeDegrees", &plain(position.longitude))?;
            out.end("Position")?;
        }
        out.optional("AltitudeMeters", self.altitude_meters, tenths)?;
        out.wrapped_value("HeartRateBpm", self.heart_rate)?;
        out.optional("Cadence", self.cadence, whole)?;

        if self.speed.is_some() || self.watts.is_some() || self.resistance.is_some() {
            out.start("Extensions")?;
            out.start(&ext("TPX"))?;
            out.optional(&ext("Speed"), self.speed, plain)?;
            out.optional(&ext("Watts"), self.watts, whole)?;
            out.optional(&ext("Resistance"), self.resistance, whole)?;
            out.end(&ext("TPX"))?;
            out.end("Extensions")?;
        }
        out.end("Trackpoint")
    }
}

impl BuiltDocument {
    /// Write the document into `dir` under its filename.
    ///
    /// The file is written to a temp file in the same directory and renamed
    /// over any previous build of the same activity.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        let xml = self.document.to_xml()?;

        let mut temp = NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut temp, xml.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        tracing::info!("Wrote {:?}", path);
        Ok(path)
    }
}
