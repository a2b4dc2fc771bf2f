use std::collections::HashMap;

use crate::models::{DisplayRow, Location, Measurement, Readings, RowKind, UNKNOWN_USER};

enum Slot<'a> {
    Single(&'a Measurement),
    Project(usize),
}

/// Builds the display rows for a fetched record list.
///
/// Records with a non-blank trimmed project key collapse into one project row
/// per key, everything else passes through as a single row. Rows come back
/// newest first; the sort is stable, so rows with equal times keep the order in
/// which their first record was fetched.
pub fn aggregate_rows(records: &[Measurement]) -> Vec<DisplayRow> {
    let mut slots: Vec<Slot> = Vec::new();
    let mut groups: Vec<(&str, Vec<&Measurement>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        match record.project_key() {
            Some(key) => {
                let group = *index.entry(key).or_insert_with(|| {
                    groups.push((key, Vec::new()));
                    slots.push(Slot::Project(groups.len() - 1));
                    groups.len() - 1
                });
                groups[group].1.push(record);
            }
            None => slots.push(Slot::Single(record)),
        }
    }

    let mut rows: Vec<DisplayRow> = slots
        .into_iter()
        .map(|slot| match slot {
            Slot::Single(record) => single_row(record),
            Slot::Project(group) => {
                let (key, members) = &groups[group];
                project_row(key, members)
            }
        })
        .collect();

    rows.sort_by(|a, b| b.time_ms.cmp(&a.time_ms));
    rows
}

/// Members of one project, newest first.
pub fn project_members(records: &[Measurement], project: &str) -> Vec<Measurement> {
    let mut members: Vec<Measurement> = records
        .iter()
        .filter(|record| record.project_key() == Some(project))
        .cloned()
        .collect();
    members.sort_by(|a, b| b.time_ms().cmp(&a.time_ms()));
    members
}

fn single_row(record: &Measurement) -> DisplayRow {
    let id = record.measurement_id();
    DisplayRow {
        kind: RowKind::Single,
        title: record
            .user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .unwrap_or(UNKNOWN_USER)
            .to_string(),
        subtitle: (!id.is_empty()).then(|| id.clone()),
        key: id,
        timestamp: display_timestamp(record),
        time_ms: record.time_ms(),
        note: record.note.clone(),
        readings: record.readings(),
        location: record.valid_location(),
        location_name: record.location_label().map(str::to_string),
        count: 1,
    }
}

fn project_row(key: &str, members: &[&Measurement]) -> DisplayRow {
    let latest = most_recent(members);
    let count = members.len();

    DisplayRow {
        kind: RowKind::Project,
        key: key.to_string(),
        title: key.to_string(),
        subtitle: Some(if count == 1 {
            "1 measurement".to_string()
        } else {
            format!("{count} measurements")
        }),
        timestamp: latest.and_then(display_timestamp),
        time_ms: latest.map(|m| m.time_ms()).unwrap_or(0),
        note: latest.and_then(|m| m.note.clone()),
        readings: Readings {
            n: Some(zero_filled_mean(members, |m| m.n)),
            p: Some(zero_filled_mean(members, |m| m.p)),
            k: Some(zero_filled_mean(members, |m| m.k)),
            ph: Some(zero_filled_mean(members, |m| m.ph)),
            ec: Some(zero_filled_mean(members, |m| m.ec)),
            temp: Some(zero_filled_mean(members, |m| m.temp)),
            hum: Some(zero_filled_mean(members, |m| m.hum)),
        },
        location: centroid(members),
        location_name: members
            .first()
            .and_then(|m| m.location_label())
            .map(str::to_string),
        count,
    }
}

/// First member with the greatest time; missing timestamps count as time zero.
fn most_recent<'a>(members: &[&'a Measurement]) -> Option<&'a Measurement> {
    let mut best: Option<(&'a Measurement, i64)> = None;
    for &member in members {
        let time = member.time_ms();
        if best.map_or(true, |(_, best_time)| time > best_time) {
            best = Some((member, time));
        }
    }
    best.map(|(member, _)| member)
}

/// Mean where a missing value contributes 0. Sparse fields drag the mean down;
/// the dashboard has always reported it this way.
pub fn zero_filled_mean<F>(members: &[&Measurement], field: F) -> f64
where
    F: Fn(&Measurement) -> Option<f64>,
{
    if members.is_empty() {
        return 0.0;
    }
    let total: f64 = members.iter().map(|&m| field(m).unwrap_or(0.0)).sum();
    total / members.len() as f64
}

/// Mean coordinates over members that have a valid location only.
pub fn centroid(members: &[&Measurement]) -> Option<Location> {
    let located: Vec<Location> = members.iter().filter_map(|m| m.valid_location()).collect();
    if located.is_empty() {
        return None;
    }
    let count = located.len() as f64;
    let latitude = located.iter().map(|l| l.latitude).sum::<f64>() / count;
    let longitude = located.iter().map(|l| l.longitude).sum::<f64>() / count;
    Location::new(latitude, longitude)
}

fn display_timestamp(record: &Measurement) -> Option<String> {
    record.display_time().map(str::to_string)
}
