use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Title used for single rows whose owner is missing or blank.
pub const UNKNOWN_USER: &str = "Unknown user";

/// A coordinate pair. Only ever constructed when both halves are present and
/// numeric, so holding one means the location is valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if latitude.is_nan() || longitude.is_nan() {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }
}

/// One sensor reading as served by `/api/measurements`.
///
/// Every field is optional and tolerant of the wrong JSON type: a value that
/// cannot be read is treated as absent instead of failing the record. The
/// snake_case and camelCase spellings of a key are kept apart so a body that
/// carries both still parses; the accessors pick the first non-blank one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub alt_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(
        rename = "createdAt",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at_camel: Option<String>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub n: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub p: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub k: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub ph: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub ec: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub hum: Option<f64>,

    #[serde(default, deserialize_with = "lenient_location")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location_name: Option<String>,
    #[serde(
        rename = "locationName",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub location_name_camel: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub note: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(
        rename = "projectName",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_name_camel: Option<String>,
}

impl Measurement {
    /// `id` when non-empty, else `_id` when non-empty, else an empty string.
    pub fn measurement_id(&self) -> String {
        non_blank(self.id.as_deref())
            .or_else(|| non_blank(self.alt_id.as_deref()))
            .unwrap_or_default()
            .to_string()
    }

    /// Trimmed project key; blank keys count as no project.
    pub fn project_key(&self) -> Option<&str> {
        [&self.project_name, &self.project_name_camel]
            .into_iter()
            .find_map(|name| name.as_deref().map(str::trim).filter(|key| !key.is_empty()))
    }

    /// Human-readable place name, if any spelling carries one.
    pub fn location_label(&self) -> Option<&str> {
        [&self.location_name, &self.location_name_camel]
            .into_iter()
            .find_map(|name| name.as_deref().filter(|label| !label.trim().is_empty()))
    }

    /// Raw time string: `timestamp`, else either spelling of the creation time.
    pub fn display_time(&self) -> Option<&str> {
        [&self.timestamp, &self.created_at, &self.created_at_camel]
            .into_iter()
            .find_map(|time| non_blank(time.as_deref().map(str::trim)))
    }

    pub fn valid_location(&self) -> Option<Location> {
        self.location
            .and_then(|loc| Location::new(loc.latitude, loc.longitude))
    }

    /// Milliseconds since the epoch used for ordering. Missing or unparseable
    /// timestamps map to zero so they sort as the earliest records.
    pub fn time_ms(&self) -> i64 {
        self.display_time()
            .and_then(parse_timestamp)
            .map(|ts| ts.timestamp_millis())
            .unwrap_or(0)
    }

    pub fn readings(&self) -> Readings {
        Readings {
            n: self.n,
            p: self.p,
            k: self.k,
            ph: self.ph,
            ec: self.ec,
            temp: self.temp,
            hum: self.hum,
        }
    }
}

/// Result of normalizing an API response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementPage {
    pub items: Vec<Measurement>,
    /// Server-reported total, only present for wrapper responses.
    pub total: Option<u64>,
}

/// Numeric sensor values. Units: N/P/K mg/kg, EC µS/cm, temp °C, hum %.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Readings {
    pub n: Option<f64>,
    pub p: Option<f64>,
    pub k: Option<f64>,
    pub ph: Option<f64>,
    pub ec: Option<f64>,
    pub temp: Option<f64>,
    pub hum: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Single,
    Project,
}

/// A unit rendered in the table and on the map: either one record passed
/// through or a project aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRow {
    pub kind: RowKind,
    /// Measurement id for singles, project name for projects.
    pub key: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub timestamp: Option<String>,
    #[serde(skip)]
    pub time_ms: i64,
    pub note: Option<String>,
    pub readings: Readings,
    pub location: Option<Location>,
    pub location_name: Option<String>,
    pub count: usize,
}

/// Parses the timestamp layouts the ingest side is known to write, plus
/// minute-precision and date-only forms. Naive layouts are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(Value::as_f64))
}

fn lenient_location<'de, D>(deserializer: D) -> Result<Option<Location>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| {
        let latitude = v.get("latitude")?.as_f64()?;
        let longitude = v.get("longitude")?.as_f64()?;
        Location::new(latitude, longitude)
    }))
}
