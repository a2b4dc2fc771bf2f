use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::DisplayRow;

/// Which row fields the free-text query is matched against.
///
/// `TitleLocation` is the current dashboard behaviour. `Broad` keeps the older
/// dashboard's wider match (id, time, note and raw N/P/K as well).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SearchScope {
    #[default]
    TitleLocation,
    Broad,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub query: String,
    pub has_location_only: bool,
    pub scope: SearchScope,
}

impl RowFilter {
    pub fn new(query: impl Into<String>, has_location_only: bool, scope: SearchScope) -> Self {
        Self {
            query: query.into(),
            has_location_only,
            scope,
        }
    }

    pub fn matches(&self, row: &DisplayRow) -> bool {
        if self.has_location_only && row.location.is_none() {
            return false;
        }

        let needle = self.query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        let contains = |haystack: &str| haystack.to_lowercase().contains(&needle);
        let optional = |haystack: &Option<String>| haystack.as_deref().is_some_and(contains);

        if contains(row.title.as_str()) || optional(&row.location_name) {
            return true;
        }

        match self.scope {
            SearchScope::TitleLocation => false,
            SearchScope::Broad => {
                contains(row.key.as_str())
                    || optional(&row.timestamp)
                    || optional(&row.note)
                    || [row.readings.n, row.readings.p, row.readings.k]
                        .iter()
                        .flatten()
                        .any(|value| contains(value.to_string().as_str()))
            }
        }
    }

    /// Rows that pass the filter, in input order.
    pub fn apply(&self, rows: &[DisplayRow]) -> Vec<DisplayRow> {
        rows.iter().filter(|row| self.matches(row)).cloned().collect()
    }
}

/// Forwards only the last value of each burst: a value is emitted once no
/// newer value has arrived for `delay`. Closing the input flushes the pending
/// value and closes the output.
pub fn debounce<T>(mut input: mpsc::Receiver<T>, delay: Duration) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while let Some(mut latest) = input.recv().await {
            loop {
                tokio::select! {
                    next = input.recv() => match next {
                        Some(value) => latest = value,
                        None => {
                            let _ = tx.send(latest).await;
                            return;
                        }
                    },
                    _ = tokio::time::sleep(delay) => {
                        if tx.send(latest).await.is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, Readings, RowKind};

    fn row(title: &str, location_name: Option<&str>, located: bool) -> DisplayRow {
        DisplayRow {
            kind: RowKind::Single,
            key: format!("id-{title}"),
            title: title.to_string(),
            subtitle: None,
            timestamp: Some("2024-05-01T08:00:00Z".to_string()),
            time_ms: 0,
            note: Some("after rain".to_string()),
            readings: Readings {
                n: Some(42.0),
                ..Default::default()
            },
            location: if located { Location::new(-6.6, 106.8) } else { None },
            location_name: location_name.map(str::to_string),
            count: 1,
        }
    }

    #[test]
    fn empty_query_returns_everything_in_order() {
        let rows = vec![row("b", None, false), row("a", None, true)];
        let filtered = RowFilter::new("   ", false, SearchScope::TitleLocation).apply(&rows);
        assert_eq!(filtered, rows);
    }

    #[test]
    fn query_is_case_insensitive_on_title_and_location() {
        let rows = vec![
            row("Budi", Some("Kebun Bogor"), false),
            row("Sari", Some("Depok"), false),
        ];
        let by_title = RowFilter::new("BUDI", false, SearchScope::TitleLocation).apply(&rows);
        assert_eq!(by_title.len(), 1);
        let by_location = RowFilter::new("bogor", false, SearchScope::TitleLocation).apply(&rows);
        assert_eq!(by_location[0].title, "Budi");
    }

    #[test]
    fn narrow_scope_ignores_note_and_numbers() {
        let rows = vec![row("Budi", None, false)];
        for query in ["rain", "42", "id-budi", "2024-05"] {
            assert!(RowFilter::new(query, false, SearchScope::TitleLocation)
                .apply(&rows)
                .is_empty());
            assert_eq!(
                RowFilter::new(query, false, SearchScope::Broad).apply(&rows).len(),
                1,
                "broad scope should match {query}"
            );
        }
    }

    #[test]
    fn location_toggle_drops_rows_without_coordinates() {
        let rows = vec![row("a", None, false), row("b", None, true)];
        let filtered = RowFilter::new("", true, SearchScope::TitleLocation).apply(&rows);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].title, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_emits_only_last_of_burst() {
        let (tx, rx) = mpsc::channel(8);
        let mut out = debounce(rx, Duration::from_millis(250));

        tx.send("s").await.unwrap();
        tx.send("so").await.unwrap();
        tx.send("soi").await.unwrap();
        assert_eq!(out.recv().await, Some("soi"));

        tx.send("soil").await.unwrap();
        assert_eq!(out.recv().await, Some("soil"));

        drop(tx);
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_input_flushes_pending_value() {
        let (tx, rx) = mpsc::channel(8);
        let mut out = debounce(rx, Duration::from_secs(60));
        tx.send(1).await.unwrap();
        drop(tx);
        assert_eq!(out.recv().await, Some(1));
        assert_eq!(out.recv().await, None);
    }
}
