use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod aggregate;
mod api;
mod config;
mod dashboard;
mod error;
mod filter;
mod format;
mod links;
mod map;
mod models;
mod normalize;
mod report;

use api::MeasurementClient;
use config::{FileConfig, Overrides, Settings};
use dashboard::{Dashboard, DashboardState, DashboardView, FetchTicket, LoadState, ProjectView};
use error::FetchError;
use filter::{RowFilter, SearchScope};
use format::DisplayFormat;
use models::MeasurementPage;

#[derive(Parser)]
#[command(name = "nutrisync")]
#[command(about = "Terminal dashboard for NutriSync soil sensor measurements", long_about = None)]
struct Cli {
    /// TOML config file (defaults to ./nutrisync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// API base URL, overrides origin inference
    #[arg(long, global = true, env = "NUTRISYNC_API_BASE_URL")]
    api_base: Option<String>,
    /// Web origin used to infer the API host
    #[arg(long, global = true, env = "NUTRISYNC_WEB_ORIGIN")]
    web_origin: Option<String>,
    /// Display locale, e.g. id-ID or en-US
    #[arg(long, global = true, env = "NUTRISYNC_LOCALE")]
    locale: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the grouped measurement table
    List {
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long)]
        has_location: bool,
        #[arg(long, value_enum)]
        scope: Option<SearchScope>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one measurement by id
    Detail { id: String },
    /// Show a project's averages and measurements
    Project { name: String },
    /// Print the desired map marker set as JSON
    Markers {
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long)]
        has_location: bool,
        #[arg(long, value_enum)]
        scope: Option<SearchScope>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export grouped rows to CSV
    Export {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Interactive dashboard: type to search, :refresh, :loc, :scope, :quit
    Browse,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutrisync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file = FileConfig::discover(cli.config.as_deref())?;
    let scope_override = match &cli.command {
        Commands::List { scope, .. } | Commands::Markers { scope, .. } => *scope,
        _ => None,
    };
    let settings = Settings::resolve(
        file,
        Overrides {
            api_base_url: cli.api_base,
            web_origin: cli.web_origin,
            locale: cli.locale,
            search_scope: scope_override,
        },
    );
    info!(api = %settings.api_base, "using measurement API");

    let client = MeasurementClient::new(settings.api_base.clone(), settings.request_timeout)
        .context("failed to build HTTP client")?;
    let fmt = DisplayFormat::local(settings.locale);

    match cli.command {
        Commands::List {
            query,
            has_location,
            limit,
            ..
        } => {
            let state = load_ready(&client).await?;
            let filter = RowFilter::new(query, has_location, settings.search_scope);
            let mut view = DashboardView::compute(&state, &filter);
            if let Some(limit) = limit {
                view.limit(limit);
            }
            print!("{}", report::render_dashboard(&state, &view, &filter, &fmt));
        }
        Commands::Detail { id } => {
            let detail = dashboard::load_detail(&client, &id, &CancellationToken::new()).await;
            print!("{}", report::render_detail(&id, &detail, &fmt));
            if let dashboard::DetailState::Failed(message) = detail {
                anyhow::bail!("failed to load measurement {id}: {message}");
            }
        }
        Commands::Project { name } => {
            let state = load_ready(&client).await?;
            let view = ProjectView::compute(&state.records, &name);
            print!("{}", report::render_project(&view, &fmt));
        }
        Commands::Markers {
            query,
            has_location,
            ..
        } => {
            let state = load_ready(&client).await?;
            let filter = RowFilter::new(query, has_location, settings.search_scope);
            let view = DashboardView::compute(&state, &filter);
            let output = json!({
                "tiles": {
                    "url": links::TILE_URL_TEMPLATE,
                    "attribution": links::TILE_ATTRIBUTION,
                    "max_zoom": links::TILE_MAX_ZOOM,
                },
                "viewport": map::fit_viewport(&view.markers),
                "markers": view
                    .markers
                    .iter()
                    .map(|marker| json!({"marker": marker, "popup_html": marker.popup_html()}))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Report { out } => {
            let state = load_ready(&client).await?;
            let view = DashboardView::compute(&state, &RowFilter::default());
            let report = report::build_report(client.base_url(), chrono::Utc::now(), &view, &fmt);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { csv } => {
            let state = load_ready(&client).await?;
            let view = DashboardView::compute(&state, &RowFilter::default());
            let written = report::export_csv(&csv, &view.rows)
                .with_context(|| format!("failed to export {}", csv.display()))?;
            println!("Exported {written} rows to {}.", csv.display());
        }
        Commands::Browse => browse(client, settings, fmt).await?,
    }

    Ok(())
}

/// Loads once and turns a failed load into a command error.
async fn load_ready(client: &MeasurementClient) -> anyhow::Result<DashboardState> {
    let mut dashboard = Dashboard::default();
    let state = dashboard.load(client, false).await.clone();
    if let LoadState::Failed(message) = &state.load {
        anyhow::bail!("failed to load measurements: {message} (run the command again to retry)");
    }
    Ok(state)
}

type FetchDone = (FetchTicket, Result<MeasurementPage, FetchError>);

fn spawn_fetch(client: &MeasurementClient, ticket: FetchTicket, done: mpsc::Sender<FetchDone>) {
    let client = client.clone();
    debug!(generation = ticket.generation(), "starting fetch");
    tokio::spawn(async move {
        let result = client.fetch_measurements(ticket.token()).await;
        let _ = done.send((ticket, result)).await;
    });
}

async fn browse(
    client: MeasurementClient,
    settings: Settings,
    fmt: DisplayFormat,
) -> anyhow::Result<()> {
    let (query_tx, query_rx) = mpsc::channel::<String>(32);
    let mut queries = filter::debounce(query_rx, settings.debounce);
    let (done_tx, mut done_rx) = mpsc::channel::<FetchDone>(4);

    let mut dashboard = Dashboard::default();
    let mut filter = RowFilter::new("", false, settings.search_scope);
    let mut shown_markers = Vec::new();

    spawn_fetch(&client, dashboard.begin_fetch(false), done_tx.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mut render = |dashboard: &Dashboard, filter: &RowFilter| {
        let view = DashboardView::compute(dashboard.state(), filter);
        let diff = map::reconcile(&shown_markers, &view.markers);
        if !diff.is_empty() {
            info!(
                added = diff.add.len(),
                removed = diff.remove.len(),
                unchanged = diff.unchanged,
                "map markers updated"
            );
        }
        shown_markers = view.markers.clone();
        println!("{}", report::render_dashboard(dashboard.state(), &view, filter, &fmt));
    };
    render(&dashboard, &filter);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    ":quit" | ":q" => break,
                    ":refresh" | ":r" => {
                        spawn_fetch(&client, dashboard.begin_fetch(true), done_tx.clone());
                        render(&dashboard, &filter);
                    }
                    ":loc" => {
                        filter.has_location_only = !filter.has_location_only;
                        render(&dashboard, &filter);
                    }
                    ":scope" => {
                        filter.scope = match filter.scope {
                            SearchScope::TitleLocation => SearchScope::Broad,
                            SearchScope::Broad => SearchScope::TitleLocation,
                        };
                        render(&dashboard, &filter);
                    }
                    _ => query_tx.send(line).await?,
                }
            }
            Some(query) = queries.recv() => {
                filter.query = query;
                render(&dashboard, &filter);
            }
            Some((ticket, result)) = done_rx.recv() => {
                if dashboard.complete(&ticket, result) {
                    render(&dashboard, &filter);
                }
            }
        }
    }

    dashboard.shutdown();
    Ok(())
}
