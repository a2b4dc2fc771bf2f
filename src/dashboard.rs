use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate_rows, project_members};
use crate::api::MeasurementClient;
use crate::error::FetchError;
use crate::filter::RowFilter;
use crate::map::{desired_markers, MapMarker};
use crate::models::{DisplayRow, Measurement, MeasurementPage, RowKind};

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// Everything the dashboard shows is derived from one of these. A snapshot is
/// never mutated in place; each transition produces a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    pub load: LoadState,
    pub refreshing: bool,
    pub records: Vec<Measurement>,
    pub server_total: Option<u64>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            load: LoadState::Loading,
            refreshing: false,
            records: Vec::new(),
            server_total: None,
        }
    }
}

/// Identifies one fetch. Results carrying an outdated ticket are dropped.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    generation: u64,
    token: CancellationToken,
}

impl FetchTicket {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns the current state snapshot and the in-flight fetch.
#[derive(Debug, Default)]
pub struct Dashboard {
    state: DashboardState,
    generation: u64,
    in_flight: Option<CancellationToken>,
}

impl Dashboard {
    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    /// Starts a new fetch, cancelling any fetch still running.
    ///
    /// A refresh keeps the current records visible while it runs; an initial
    /// load shows the loading state.
    pub fn begin_fetch(&mut self, refresh: bool) -> FetchTicket {
        if let Some(previous) = self.in_flight.take() {
            debug!(generation = self.generation, "superseding in-flight fetch");
            previous.cancel();
        }

        self.generation += 1;
        let token = CancellationToken::new();
        self.in_flight = Some(token.clone());

        self.state = DashboardState {
            load: if refresh && self.state.load == LoadState::Ready {
                LoadState::Ready
            } else {
                LoadState::Loading
            },
            refreshing: refresh,
            ..self.state.clone()
        };

        FetchTicket {
            generation: self.generation,
            token,
        }
    }

    /// Applies a fetch result. Returns false when the result was discarded
    /// because it was cancelled or belongs to a superseded fetch.
    pub fn complete(
        &mut self,
        ticket: &FetchTicket,
        result: Result<MeasurementPage, FetchError>,
    ) -> bool {
        if ticket.generation != self.generation {
            debug!(
                stale = ticket.generation,
                current = self.generation,
                "discarding stale fetch result"
            );
            return false;
        }
        if result.as_ref().err().is_some_and(FetchError::is_cancelled) {
            return false;
        }
        self.in_flight = None;

        self.state = match result {
            Ok(page) => DashboardState {
                load: LoadState::Ready,
                refreshing: false,
                records: page.items,
                server_total: page.total,
            },
            Err(err) => {
                warn!(error = %err, "failed to load measurements");
                DashboardState {
                    load: LoadState::Failed(err.to_string()),
                    refreshing: false,
                    records: Vec::new(),
                    server_total: None,
                }
            }
        };
        true
    }

    /// Cancels whatever is in flight, e.g. when leaving the page.
    pub fn shutdown(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }

    /// Runs one fetch to completion and applies it.
    pub async fn load(&mut self, client: &MeasurementClient, refresh: bool) -> &DashboardState {
        let ticket = self.begin_fetch(refresh);
        let result = client.fetch_measurements(ticket.token()).await;
        self.complete(&ticket, result);
        &self.state
    }
}

/// What the dashboard renders for one state snapshot and filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub rows: Vec<DisplayRow>,
    pub filtered: Vec<DisplayRow>,
    /// Server total when the API reported one, otherwise the record count.
    pub total_shown: u64,
    pub located_count: usize,
    pub markers: Vec<MapMarker>,
}

impl DashboardView {
    pub fn compute(state: &DashboardState, filter: &RowFilter) -> Self {
        let rows = aggregate_rows(&state.records);
        let filtered = filter.apply(&rows);
        let markers = desired_markers(&filtered);
        Self {
            total_shown: state
                .server_total
                .unwrap_or(state.records.len() as u64),
            located_count: located(&filtered),
            rows,
            filtered,
            markers,
        }
    }

    pub fn latest(&self) -> Option<&DisplayRow> {
        self.filtered.first()
    }

    /// Keeps the first `limit` filtered rows. Counts and markers follow the
    /// rows that remain.
    pub fn limit(&mut self, limit: usize) {
        if self.filtered.len() <= limit {
            return;
        }
        self.filtered.truncate(limit);
        self.located_count = located(&self.filtered);
        self.markers = desired_markers(&self.filtered);
    }
}

fn located(rows: &[DisplayRow]) -> usize {
    rows.iter().filter(|r| r.location.is_some()).count()
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailState {
    Found(Box<Measurement>),
    NotFound,
    Failed(String),
}

pub async fn load_detail(
    client: &MeasurementClient,
    id: &str,
    cancel: &CancellationToken,
) -> DetailState {
    match client.fetch_measurement(id, cancel).await {
        Ok(Some(measurement)) => DetailState::Found(Box::new(measurement)),
        Ok(None) => {
            info!(id, "measurement not found");
            DetailState::NotFound
        }
        Err(err) => DetailState::Failed(err.to_string()),
    }
}

/// Drill-down for one project: its aggregate row plus the raw members.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectView {
    pub name: String,
    pub summary: Option<DisplayRow>,
    pub members: Vec<Measurement>,
}

impl ProjectView {
    pub fn compute(records: &[Measurement], name: &str) -> Self {
        let name = name.trim();
        let members = project_members(records, name);
        let summary = aggregate_rows(&members)
            .into_iter()
            .find(|row| row.kind == RowKind::Project && row.key == name);
        Self {
            name: name.to_string(),
            summary,
            members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SearchScope;
    use crate::models::Location;

    fn page(ids: &[&str], total: Option<u64>) -> MeasurementPage {
        MeasurementPage {
            items: ids
                .iter()
                .map(|id| Measurement {
                    id: Some(id.to_string()),
                    ..Default::default()
                })
                .collect(),
            total,
        }
    }

    #[test]
    fn successful_fetch_becomes_ready() {
        let mut dashboard = Dashboard::default();
        assert_eq!(dashboard.state().load, LoadState::Loading);
        let ticket = dashboard.begin_fetch(false);
        assert!(dashboard.complete(&ticket, Ok(page(&["a", "b"], Some(10)))));
        assert_eq!(dashboard.state().load, LoadState::Ready);
        assert_eq!(dashboard.state().records.len(), 2);
        assert_eq!(dashboard.state().server_total, Some(10));
    }

    #[test]
    fn new_fetch_cancels_previous_and_stale_result_is_ignored() {
        let mut dashboard = Dashboard::default();
        let first = dashboard.begin_fetch(false);
        let second = dashboard.begin_fetch(true);
        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());

        assert!(dashboard.complete(&second, Ok(page(&["new"], None))));
        assert!(!dashboard.complete(&first, Ok(page(&["old", "older"], None))));
        assert_eq!(dashboard.state().records.len(), 1);
        assert_eq!(dashboard.state().records[0].measurement_id(), "new");
    }

    #[test]
    fn cancelled_result_is_silent() {
        let mut dashboard = Dashboard::default();
        let ticket = dashboard.begin_fetch(false);
        assert!(!dashboard.complete(&ticket, Err(FetchError::Cancelled)));
        assert_eq!(dashboard.state().load, LoadState::Loading);
    }

    #[test]
    fn failure_clears_previous_data() {
        let mut dashboard = Dashboard::default();
        let ticket = dashboard.begin_fetch(false);
        dashboard.complete(&ticket, Ok(page(&["a"], Some(1))));

        let retry = dashboard.begin_fetch(true);
        assert_eq!(dashboard.state().load, LoadState::Ready);
        assert!(dashboard.state().refreshing);
        dashboard.complete(
            &retry,
            Err(FetchError::Status {
                status: 502,
                url: "http://api/api/measurements".to_string(),
            }),
        );
        let state = dashboard.state();
        assert!(matches!(state.load, LoadState::Failed(ref msg) if msg.contains("502")));
        assert!(state.records.is_empty());
        assert_eq!(state.server_total, None);
        assert!(!state.refreshing);
    }

    #[test]
    fn shutdown_cancels_in_flight() {
        let mut dashboard = Dashboard::default();
        let ticket = dashboard.begin_fetch(false);
        dashboard.shutdown();
        assert!(ticket.token().is_cancelled());
    }

    #[test]
    fn view_counts_and_latest() {
        let mut records = page(&["a", "b", "c"], None).items;
        records[1].timestamp = Some("2024-06-01T00:00:00Z".to_string());
        records[1].location = Location::new(-6.2, 106.8);
        let state = DashboardState {
            load: LoadState::Ready,
            refreshing: false,
            records,
            server_total: None,
        };

        let view = DashboardView::compute(&state, &RowFilter::default());
        assert_eq!(view.total_shown, 3);
        assert_eq!(view.filtered.len(), 3);
        assert_eq!(view.located_count, 1);
        assert_eq!(view.markers.len(), 1);
        assert_eq!(view.latest().map(|r| r.key.as_str()), Some("b"));

        let located_only = RowFilter::new("", true, SearchScope::TitleLocation);
        let view = DashboardView::compute(&state, &located_only);
        assert_eq!(view.filtered.len(), 1);
        assert_eq!(view.rows.len(), 3);
    }

    #[test]
    fn limit_recomputes_counts_and_markers() {
        let mut records = page(&["a", "b", "c"], None).items;
        records[0].timestamp = Some("2024-06-03T00:00:00Z".to_string());
        records[1].timestamp = Some("2024-06-02T00:00:00Z".to_string());
        records[2].timestamp = Some("2024-06-01T00:00:00Z".to_string());
        records[1].location = Location::new(-6.2, 106.8);
        records[2].location = Location::new(-6.3, 106.9);
        let state = DashboardState {
            load: LoadState::Ready,
            refreshing: false,
            records,
            server_total: None,
        };

        let mut view = DashboardView::compute(&state, &RowFilter::default());
        assert_eq!(view.located_count, 2);
        view.limit(2);
        assert_eq!(view.filtered.len(), 2);
        assert_eq!(view.located_count, 1);
        assert_eq!(view.markers.len(), 1);
        assert_eq!(view.markers[0].key, "measurement:b");
        assert_eq!(view.rows.len(), 3);
        assert_eq!(view.total_shown, 3);
    }

    #[test]
    fn view_prefers_server_total() {
        let state = DashboardState {
            load: LoadState::Ready,
            refreshing: false,
            records: page(&["a"], None).items,
            server_total: Some(250),
        };
        assert_eq!(DashboardView::compute(&state, &RowFilter::default()).total_shown, 250);
    }

    #[test]
    fn project_view_collects_members() {
        let mut records = page(&["a", "b", "c"], None).items;
        records[0].project_name = Some("Farm A".to_string());
        records[0].n = Some(20.0);
        records[2].project_name = Some(" Farm A ".to_string());
        let view = ProjectView::compute(&records, "Farm A");
        assert_eq!(view.members.len(), 2);
        let summary = view.summary.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.readings.n, Some(10.0));

        let missing = ProjectView::compute(&records, "Nope");
        assert!(missing.members.is_empty());
        assert!(missing.summary.is_none());
    }
}
