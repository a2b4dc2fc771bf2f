use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{Measurement, MeasurementPage};

const LIST_KEYS: [&str; 2] = ["dataList", "data_list"];
const TOTAL_KEYS: [&str; 2] = ["totalCount", "total_count"];

/// Turns whatever the API returned into a record list.
///
/// A bare array is the record list. An object is searched for the list and
/// total under both key spellings. Anything else yields an empty page.
pub fn normalize_measurements(body: &Value) -> MeasurementPage {
    match body {
        Value::Array(items) => MeasurementPage {
            items: parse_items(items),
            total: None,
        },
        Value::Object(map) => {
            let items = LIST_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
                .map(|items| parse_items(items))
                .unwrap_or_default();
            let total = TOTAL_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_u64));
            MeasurementPage { items, total }
        }
        other => {
            debug!(kind = value_kind(other), "unrecognized response shape");
            MeasurementPage::default()
        }
    }
}

fn parse_items(items: &[Value]) -> Vec<Measurement> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            match serde_json::from_value::<Measurement>(item.clone()) {
                Ok(measurement) => Some(measurement),
                Err(err) => {
                    warn!(index, error = %err, "skipping unreadable measurement");
                    None
                }
            }
        })
        .collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
