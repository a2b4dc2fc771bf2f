use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dashboard::{DashboardState, DashboardView, DetailState, LoadState, ProjectView};
use crate::filter::RowFilter;
use crate::format::DisplayFormat;
use crate::links::{dashboard_route, external_map_link, row_route};
use crate::models::{DisplayRow, RowKind, UNKNOWN_USER};

const NOT_PROVIDED: &str = "-";
const CELL_WIDTH: usize = 24;

/// Plain-text table of display rows.
pub fn render_table(rows: &[DisplayRow], fmt: &DisplayFormat) -> String {
    let header = [
        "Type", "Name", "Time", "Location", "N", "P", "K", "pH", "Count", "Open",
    ];
    let mut lines: Vec<Vec<String>> = vec![header.iter().map(|h| h.to_string()).collect()];

    for row in rows {
        lines.push(vec![
            match row.kind {
                RowKind::Single => "single".to_string(),
                RowKind::Project => "project".to_string(),
            },
            row.title.clone(),
            fmt.timestamp(row.timestamp.as_deref()),
            text_or(row.location_name.as_deref(), NOT_PROVIDED).to_string(),
            fmt.number(row.readings.n, 1),
            fmt.number(row.readings.p, 1),
            fmt.number(row.readings.k, 1),
            fmt.number(row.readings.ph, 2),
            row.count.to_string(),
            row_route(row).unwrap_or_else(|| NOT_PROVIDED.to_string()),
        ]);
    }

    let columns = header.len();
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            lines
                .iter()
                .map(|line| clip(&line[col]).chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut output = String::new();
    for (index, line) in lines.iter().enumerate() {
        let cells: Vec<String> = line
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(&clip(cell), *width))
            .collect();
        let _ = writeln!(output, "{}", cells.join("  ").trim_end());
        if index == 0 {
            let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
            let _ = writeln!(output, "{}", rule.join("  "));
        }
    }
    output
}

/// KPIs, status line and table for the main dashboard.
pub fn render_dashboard(
    state: &DashboardState,
    view: &DashboardView,
    filter: &RowFilter,
    fmt: &DisplayFormat,
) -> String {
    let mut output = String::new();
    let latest_time = view
        .latest()
        .map(|row| fmt.timestamp(row.timestamp.as_deref()))
        .unwrap_or_else(|| NOT_PROVIDED.to_string());

    let _ = writeln!(
        output,
        "Total data: {} | Filtered: {} | Latest: {} | With coordinates: {}",
        view.total_shown,
        view.filtered.len(),
        latest_time,
        view.located_count
    );
    let query = filter.query.trim();
    let _ = writeln!(
        output,
        "Search: {} | Only with location: {} | Scope: {:?}",
        if query.is_empty() { NOT_PROVIDED } else { query },
        if filter.has_location_only { "yes" } else { "no" },
        filter.scope
    );
    if state.refreshing {
        let _ = writeln!(output, "Refreshing...");
    }
    let _ = writeln!(output);

    match &state.load {
        LoadState::Loading => {
            let _ = writeln!(output, "Loading...");
        }
        LoadState::Failed(message) => {
            let _ = writeln!(output, "Failed to load data.");
            let _ = writeln!(output, "{message}");
            let _ = writeln!(output, "Retry with :refresh or run the command again.");
        }
        LoadState::Ready if view.filtered.is_empty() => {
            let _ = writeln!(output, "No data to display.");
        }
        LoadState::Ready => output.push_str(&render_table(&view.filtered, fmt)),
    }
    output
}

pub fn render_detail(id: &str, state: &DetailState, fmt: &DisplayFormat) -> String {
    let mut output = String::new();
    let measurement = match state {
        DetailState::NotFound => {
            let _ = writeln!(output, "Measurement {id} not found.");
            let _ = writeln!(output, "Back: {}", dashboard_route());
            return output;
        }
        DetailState::Failed(message) => {
            let _ = writeln!(output, "Failed to load measurement {id}: {message}");
            return output;
        }
        DetailState::Found(measurement) => measurement,
    };

    let shown_id = measurement.measurement_id();
    let _ = writeln!(output, "# Measurement detail");
    let _ = writeln!(output, "User: {}", text_or(measurement.user.as_deref(), UNKNOWN_USER));
    let _ = writeln!(output, "ID: {}", if shown_id.is_empty() { NOT_PROVIDED } else { shown_id.as_str() });
    let _ = writeln!(output, "Time: {}", fmt.timestamp(measurement.display_time()));
    let _ = writeln!(output, "Note: {}", text_or(measurement.note.as_deref(), "None"));
    if let Some(project) = measurement.project_key() {
        let _ = writeln!(output, "Project: {project}");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## NPK");
    let _ = writeln!(output, "Nitrogen (N): {} mg/kg", fmt.number(measurement.n, 1));
    let _ = writeln!(output, "Phosphorus (P): {} mg/kg", fmt.number(measurement.p, 1));
    let _ = writeln!(output, "Potassium (K): {} mg/kg", fmt.number(measurement.k, 1));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Other sensors");
    let _ = writeln!(output, "pH: {}", fmt.number(measurement.ph, 1));
    let _ = writeln!(output, "EC: {} µS/cm", fmt.number(measurement.ec, 1));
    let _ = writeln!(output, "Temperature: {} °C", fmt.number(measurement.temp, 1));
    let _ = writeln!(output, "Humidity: {} %", fmt.number(measurement.hum, 0));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Location");
    let _ = writeln!(
        output,
        "{}",
        text_or(measurement.location_label(), "Not available")
    );
    match measurement.valid_location() {
        Some(location) => {
            let _ = writeln!(
                output,
                "Coordinates: {}, {}",
                location.latitude, location.longitude
            );
            let _ = writeln!(output, "Map: {}", external_map_link(location));
        }
        None => {
            let _ = writeln!(output, "Coordinates: {NOT_PROVIDED} (no latitude/longitude recorded)");
        }
    }
    output
}

pub fn render_project(view: &ProjectView, fmt: &DisplayFormat) -> String {
    let mut output = String::new();
    let Some(summary) = &view.summary else {
        let _ = writeln!(output, "Project {} has no measurements.", view.name);
        return output;
    };

    let _ = writeln!(output, "# Project: {}", view.name);
    let _ = writeln!(output, "{} measurements in this project.", summary.count);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Project averages");
    let _ = writeln!(output, "pH: {}", fmt.number(summary.readings.ph, 2));
    let _ = writeln!(output, "N: {} mg/kg", fmt.number(summary.readings.n, 0));
    let _ = writeln!(output, "P: {} mg/kg", fmt.number(summary.readings.p, 0));
    let _ = writeln!(output, "K: {} mg/kg", fmt.number(summary.readings.k, 0));
    if let Some(location) = summary.location {
        let _ = writeln!(
            output,
            "Centre: {}, {} ({})",
            location.latitude,
            location.longitude,
            external_map_link(location)
        );
    }
    if let Some(note) = summary.note.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(output, "Latest note: {note}");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Measurements");
    for member in &view.members {
        let _ = writeln!(
            output,
            "- {} at {}: pH {} | N {} | P {} | K {} | EC {} | {} °C",
            fmt.timestamp(member.display_time()),
            text_or(member.location_label(), NOT_PROVIDED),
            fmt.number(member.ph, 1),
            fmt.number(member.n, 0),
            fmt.number(member.p, 0),
            fmt.number(member.k, 0),
            fmt.number(member.ec, 0),
            fmt.number(member.temp, 1),
        );
    }
    output
}

/// Markdown summary of the current dashboard.
pub fn build_report(
    api_base: &str,
    generated_at: DateTime<Utc>,
    view: &DashboardView,
    fmt: &DisplayFormat,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# NutriSync Measurement Report");
    let _ = writeln!(
        output,
        "Generated {} from {}",
        fmt.timestamp(Some(&generated_at.to_rfc3339())),
        api_base
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Total data: {}", view.total_shown);
    let _ = writeln!(output, "- Rows after grouping: {}", view.rows.len());
    let _ = writeln!(output, "- Points with coordinates: {}", view.located_count);
    let _ = writeln!(
        output,
        "- Latest measurement: {}",
        view.latest()
            .map(|row| fmt.timestamp(row.timestamp.as_deref()))
            .unwrap_or_else(|| NOT_PROVIDED.to_string())
    );

    let projects: Vec<&DisplayRow> = view
        .rows
        .iter()
        .filter(|row| row.kind == RowKind::Project)
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Projects");
    if projects.is_empty() {
        let _ = writeln!(output, "No project measurements.");
    } else {
        for row in projects {
            let _ = writeln!(
                output,
                "- {}: {} measurements, avg pH {}, N {}, P {}, K {}, EC {}, temp {} °C (latest {})",
                row.title,
                row.count,
                fmt.number(row.readings.ph, 2),
                fmt.number(row.readings.n, 0),
                fmt.number(row.readings.p, 0),
                fmt.number(row.readings.k, 0),
                fmt.number(row.readings.ec, 0),
                fmt.number(row.readings.temp, 1),
                fmt.timestamp(row.timestamp.as_deref())
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Notes");
    let notes: Vec<&DisplayRow> = view
        .rows
        .iter()
        .filter(|row| row.note.as_deref().is_some_and(|n| !n.trim().is_empty()))
        .take(5)
        .collect();
    if notes.is_empty() {
        let _ = writeln!(output, "No notes recorded.");
    } else {
        for row in notes {
            let _ = writeln!(
                output,
                "- {} on {}: {}",
                row.title,
                fmt.timestamp(row.timestamp.as_deref()),
                row.note.as_deref().unwrap_or_default().trim()
            );
        }
    }

    output
}

#[derive(Serialize)]
struct CsvRow<'a> {
    kind: &'a str,
    key: &'a str,
    title: &'a str,
    timestamp: Option<&'a str>,
    count: usize,
    n: Option<f64>,
    p: Option<f64>,
    k: Option<f64>,
    ph: Option<f64>,
    ec: Option<f64>,
    temp: Option<f64>,
    hum: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_name: Option<&'a str>,
    note: Option<&'a str>,
}

/// Writes rows with raw (unformatted) values. Returns the number written.
pub fn export_csv(path: &Path, rows: &[DisplayRow]) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(CsvRow {
            kind: match row.kind {
                RowKind::Single => "single",
                RowKind::Project => "project",
            },
            key: &row.key,
            title: &row.title,
            timestamp: row.timestamp.as_deref(),
            count: row.count,
            n: row.readings.n,
            p: row.readings.p,
            k: row.readings.k,
            ph: row.readings.ph,
            ec: row.readings.ec,
            temp: row.readings.temp,
            hum: row.readings.hum,
            latitude: row.location.map(|l| l.latitude),
            longitude: row.location.map(|l| l.longitude),
            location_name: row.location_name.as_deref(),
            note: row.note.as_deref(),
        })?;
    }
    writer.flush()?;
    Ok(rows.len())
}

fn text_or<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(fallback)
}

fn clip(cell: &str) -> String {
    if cell.chars().count() <= CELL_WIDTH {
        cell.to_string()
    } else {
        let mut clipped: String = cell.chars().take(CELL_WIDTH - 1).collect();
        clipped.push('…');
        clipped
    }
}

fn pad(cell: &str, width: usize) -> String {
    let len = cell.chars().count();
    format!("{cell}{}", " ".repeat(width.saturating_sub(len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::DashboardState;
    use crate::format::DisplayLocale;
    use crate::models::{Location, Measurement};
    use chrono::{FixedOffset, TimeZone};

    fn fmt() -> DisplayFormat {
        DisplayFormat::new(DisplayLocale::English, FixedOffset::east_opt(0).unwrap())
    }

    fn records() -> Vec<Measurement> {
        vec![
            Measurement {
                id: Some("m-1".to_string()),
                user: Some("Sari".to_string()),
                timestamp: Some("2024-05-01T08:00:00Z".to_string()),
                n: Some(12.0),
                note: Some("dry topsoil".to_string()),
                location: Location::new(-6.6, 106.8),
                location_name: Some("Bogor".to_string()),
                ..Default::default()
            },
            Measurement {
                id: Some("m-2".to_string()),
                timestamp: Some("2024-05-03T08:00:00Z".to_string()),
                project_name: Some("Farm A".to_string()),
                ph: Some(6.5),
                ..Default::default()
            },
            Measurement {
                id: Some("m-3".to_string()),
                project_name: Some("Farm A".to_string()),
                ph: Some(5.5),
                note: Some("after rain".to_string()),
                ..Default::default()
            },
        ]
    }

    fn ready_view() -> (DashboardState, DashboardView) {
        let state = DashboardState {
            load: LoadState::Ready,
            refreshing: false,
            records: records(),
            server_total: Some(40),
        };
        let view = DashboardView::compute(&state, &RowFilter::default());
        (state, view)
    }

    #[test]
    fn table_lists_rows_with_routes() {
        let (_, view) = ready_view();
        let table = render_table(&view.filtered, &fmt());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Type"));
        assert!(lines[2].contains("Farm A"));
        assert!(lines[2].contains("/project/Farm%20A"));
        assert!(lines[3].contains("/detail/m-1"));
        assert!(lines[3].contains("N/A"));
    }

    #[test]
    fn blank_location_name_shows_placeholder() {
        let (_, view) = ready_view();
        let mut row = view.filtered[1].clone();
        row.location_name = Some(String::new());
        let table = render_table(&[row], &fmt());
        let lines: Vec<&str> = table.lines().collect();
        let column = lines[0].find("Location").unwrap();
        assert!(lines[2][column..].starts_with("- "));
    }

    #[test]
    fn dashboard_shows_error_state() {
        let state = DashboardState {
            load: LoadState::Failed("fetch failed: 500".to_string()),
            ..Default::default()
        };
        let view = DashboardView::compute(&state, &RowFilter::default());
        let text = render_dashboard(&state, &view, &RowFilter::default(), &fmt());
        assert!(text.contains("Failed to load data."));
        assert!(text.contains("fetch failed: 500"));
        assert!(text.contains("Total data: 0"));
    }

    #[test]
    fn dashboard_shows_kpis_and_empty_message() {
        let (state, _) = ready_view();
        let filter = RowFilter::new("nothing matches", false, Default::default());
        let view = DashboardView::compute(&state, &filter);
        let text = render_dashboard(&state, &view, &filter, &fmt());
        assert!(text.contains("Total data: 40 | Filtered: 0"));
        assert!(text.contains("No data to display."));
    }

    #[test]
    fn detail_not_found_is_distinct() {
        let text = render_detail("does-not-exist", &DetailState::NotFound, &fmt());
        assert!(text.contains("not found"));
        assert!(!text.contains("Failed"));
    }

    #[test]
    fn detail_renders_values_and_link() {
        let found = DetailState::Found(Box::new(records().remove(0)));
        let text = render_detail("m-1", &found, &fmt());
        assert!(text.contains("User: Sari"));
        assert!(text.contains("Nitrogen (N): 12 mg/kg"));
        assert!(text.contains("pH: N/A"));
        assert!(text.contains("https://www.google.com/maps?q=-6.6,106.8"));
    }

    #[test]
    fn project_page_shows_averages() {
        let view = ProjectView::compute(&records(), "Farm A");
        let text = render_project(&view, &fmt());
        assert!(text.contains("2 measurements in this project."));
        assert!(text.contains("pH: 6\n"));
        assert!(!text.contains("Latest note"));
        assert!(!text.contains("after rain"));
    }

    #[test]
    fn report_has_sections() {
        let (_, view) = ready_view();
        let generated = Utc.with_ymd_and_hms(2024, 5, 4, 9, 30, 0).unwrap();
        let report = build_report("http://localhost:8080", generated, &view, &fmt());
        assert!(report.starts_with("# NutriSync Measurement Report"));
        assert!(report.contains("Generated May 4, 2024, 9:30 AM from http://localhost:8080"));
        assert!(report.contains("- Total data: 40"));
        assert!(report.contains("- Farm A: 2 measurements, avg pH 6, N 0"));
        assert!(report.contains("dry topsoil"));
    }

    #[test]
    fn csv_export_writes_all_rows() {
        let (_, view) = ready_view();
        let file = tempfile::NamedTempFile::new().unwrap();
        let written = export_csv(file.path(), &view.rows).unwrap();
        assert_eq!(written, 2);

        let mut reader = csv::Reader::from_path(file.path()).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "kind");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "project");
        assert_eq!(&rows[0][1], "Farm A");
    }
}
