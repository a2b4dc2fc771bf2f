//! Declarative map state.
//!
//! The map collaborator is handed the full set of markers it should show and a
//! viewport; `reconcile` tells it which markers to add or drop relative to what
//! it currently displays.

use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Serialize;

use crate::links::{external_map_link, row_route};
use crate::models::{DisplayRow, Location, Readings, RowKind};

pub const DEFAULT_CENTER: Location = Location {
    latitude: -2.5,
    longitude: 118.0,
};
pub const DEFAULT_ZOOM: u8 = 5;
pub const FOCUS_ZOOM: u8 = 12;
pub const BOUNDS_PADDING: f64 = 0.2;
const UNKNOWN_LOCATION: &str = "Unknown location";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    /// Stable identity used for reconciliation.
    pub key: String,
    pub kind: RowKind,
    pub position: Location,
    pub label: String,
    pub timestamp: Option<String>,
    pub readings: Readings,
    pub note: Option<String>,
    pub id: Option<String>,
    pub route: Option<String>,
    pub external_link: String,
}

impl MapMarker {
    /// Popup body. Text is escaped as element content, links as
    /// double-quoted attribute values.
    pub fn popup_html(&self) -> String {
        let number = |v: Option<f64>| v.map_or_else(|| "N/A".to_string(), |v| v.to_string());
        let mut html = format!(
            "<strong>{}</strong><br/><small>{}</small><br/>\
             <div>N: {} | P: {} | K: {}</div>",
            encode_text(&self.label),
            encode_text(self.timestamp.as_deref().unwrap_or_default()),
            number(self.readings.n),
            number(self.readings.p),
            number(self.readings.k),
        );
        if let Some(note) = self.note.as_deref().filter(|n| !n.trim().is_empty()) {
            html.push_str(&format!("<div><em>{}</em></div>", encode_text(note)));
        }
        if let Some(id) = &self.id {
            html.push_str(&format!("<div><small>ID: {}</small></div>", encode_text(id)));
        }
        html.push_str(&format!(
            "<div><a href=\"{}\" target=\"_blank\" rel=\"noreferrer\">Google Maps</a>",
            encode_double_quoted_attribute(&self.external_link)
        ));
        if let Some(route) = &self.route {
            html.push_str(&format!(
                " <a href=\"{}\">Detail</a>",
                encode_double_quoted_attribute(route)
            ));
        }
        html.push_str("</div>");
        html
    }
}

/// Markers for every row that has a valid location, in row order.
pub fn desired_markers(rows: &[DisplayRow]) -> Vec<MapMarker> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let position = row.location?;
            Some(MapMarker {
                key: marker_key(row, index),
                kind: row.kind,
                position,
                label: row
                    .location_name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
                timestamp: row.timestamp.clone(),
                readings: row.readings,
                note: row.note.clone(),
                id: (row.kind == RowKind::Single && !row.key.is_empty()).then(|| row.key.clone()),
                route: row_route(row),
                external_link: external_map_link(position),
            })
        })
        .collect()
}

fn marker_key(row: &DisplayRow, index: usize) -> String {
    match row.kind {
        RowKind::Project => format!("project:{}", row.key),
        RowKind::Single if !row.key.is_empty() => format!("measurement:{}", row.key),
        RowKind::Single => format!(
            "row:{}-{}",
            row.timestamp.as_deref().unwrap_or("row"),
            index
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Viewport {
    Center { center: Location, zoom: u8 },
    Bounds { south_west: Location, north_east: Location },
}

/// No markers: default overview. One marker: centred close-up. Several:
/// their bounding box padded by `BOUNDS_PADDING` on each side.
pub fn fit_viewport(markers: &[MapMarker]) -> Viewport {
    match markers {
        [] => Viewport::Center {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        },
        [only] => Viewport::Center {
            center: only.position,
            zoom: FOCUS_ZOOM,
        },
        many => {
            let lats = many.iter().map(|m| m.position.latitude);
            let lons = many.iter().map(|m| m.position.longitude);
            let (south, north) = min_max(lats);
            let (west, east) = min_max(lons);
            let lat_pad = (north - south) * BOUNDS_PADDING;
            let lon_pad = (east - west) * BOUNDS_PADDING;
            Viewport::Bounds {
                south_west: Location {
                    latitude: south - lat_pad,
                    longitude: west - lon_pad,
                },
                north_east: Location {
                    latitude: north + lat_pad,
                    longitude: east + lon_pad,
                },
            }
        }
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerDiff {
    pub add: Vec<MapMarker>,
    pub remove: Vec<String>,
    pub unchanged: usize,
}

impl MarkerDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Changes needed to turn `current` into `desired`. A marker whose key is
/// kept but whose content changed is removed and re-added.
pub fn reconcile(current: &[MapMarker], desired: &[MapMarker]) -> MarkerDiff {
    let mut diff = MarkerDiff::default();
    for marker in current {
        if !desired.contains(marker) {
            diff.remove.push(marker.key.clone());
        }
    }
    for marker in desired {
        if current.contains(marker) {
            diff.unchanged += 1;
        } else {
            diff.add.push(marker.clone());
        }
    }
    diff
}
