//! CLI entry point for the SoCal traffic tool.
//!
//! Provides subcommands for scraping live speeds into the archive, mirroring
//! the archive from S3, analyzing commute departure times, reporting recent
//! conditions, and exporting readings.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc, Weekday};
use clap::{Parser, Subcommand};
use socal_traffic::analyzers::analyzer::{analyze, publish, write_local};
use socal_traffic::analyzers::recent::{
    current_status, data_stats, find_slowdowns, recent_incidents,
};
use socal_traffic::analyzers::types::{CommuteQuery, DEFAULT_MILES_PER_SENSOR, SampleWeighting};
use socal_traffic::archive::{self, backfill, download_days};
use socal_traffic::config::{Settings, s3_client};
use socal_traffic::fetch::{BasicClient, load_source, with_cache_buster};
use socal_traffic::ingest::{NormalizedBatch, normalize};
use socal_traffic::model::Direction;
use socal_traffic::output::{ExportRow, append_record, export_readings};
use socal_traffic::parser::parse_payload;
use socal_traffic::routes::{CommutePeriod, Route, RouteBook};
use socal_traffic::stats::IngestStats;
use socal_traffic::store::SharedStore;
use socal_traffic::topology::Topology;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "socal_traffic")]
#[command(about = "Scrape SoCal traffic speeds and find the best commute times", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll live speeds and incidents into the archive
    Scrape {
        /// Live payload URL or file (defaults to DATA_URL)
        #[arg(value_name = "FILE_OR_URL")]
        source: Option<String>,

        /// Sample rate: poll every X seconds
        #[arg(short = 'r', long, default_value_t = 300)]
        sample_rate: u64,

        /// Number of samples to collect (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 1)]
        num_samples: usize,

        /// Gzip compress archived polls
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Upload archived polls to S3_BUCKET
        #[arg(long, default_value_t = false)]
        upload: bool,

        /// CSV file to append per-poll ingest stats to
        #[arg(short, long, default_value = "logs/scrape_stats.csv")]
        output: String,
    },
    /// Mirror archived polls from S3 into the local archive
    Download {
        /// Number of days back from today to download
        #[arg(short, long, default_value_t = 7)]
        days: i64,

        /// Download a single date instead (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Rank departure times for commute routes from the archive
    Commute {
        /// Route name from the route book (default: every route)
        #[arg(long)]
        route: Option<String>,

        /// Only routes of this commute period
        #[arg(long, value_enum)]
        period: Option<CommutePeriod>,

        /// Days of history to analyze
        #[arg(short, long, default_value_t = 14)]
        days: i64,

        /// Bucket size in minutes
        #[arg(short, long, default_value_t = 15)]
        bucket_minutes: u32,

        /// Only count these local weekdays (e.g. mon,tue,wed)
        #[arg(long, value_delimiter = ',')]
        weekdays: Vec<Weekday>,

        /// Weight samples by recency with this half-life in days
        #[arg(long)]
        half_life_days: Option<f64>,

        /// Assumed distance between consecutive sensors
        #[arg(long, default_value_t = DEFAULT_MILES_PER_SENSOR)]
        miles_per_sensor: f64,

        /// Write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Publish the JSON report to S3_BUCKET
        #[arg(long, default_value_t = false)]
        upload: bool,

        /// Maximum number of archive files loaded concurrently
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
    /// Current travel time of each commute route, quickest first
    Status {
        /// Only routes of this commute period
        #[arg(long, value_enum)]
        period: Option<CommutePeriod>,

        /// Minutes of recent readings to average
        #[arg(short, long, default_value_t = 30)]
        minutes: i64,

        /// Assumed distance between consecutive sensors
        #[arg(long, default_value_t = DEFAULT_MILES_PER_SENSOR)]
        miles_per_sensor: f64,

        /// Maximum number of archive files loaded concurrently
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
    /// Sensors averaging below a speed threshold
    Slowdowns {
        /// Speed threshold in mph
        #[arg(short, long, default_value_t = 25.0)]
        threshold: f64,

        /// Hours of history to average
        #[arg(long, default_value_t = 1)]
        hours: i64,

        /// Maximum number of sensors to list
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Maximum number of archive files loaded concurrently
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
    /// Incidents first seen recently, newest first
    Incidents {
        /// Hours of history to look back
        #[arg(long, default_value_t = 4)]
        hours: i64,

        /// Maximum number of incidents to list
        #[arg(short, long, default_value_t = 5)]
        limit: usize,

        /// Maximum number of archive files loaded concurrently
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
    /// Summarize the archived data
    Stats {
        /// Maximum number of archive files loaded concurrently
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
    /// List highways and directions with their sensor counts
    Routes,
    /// Export one highway's readings to CSV
    Export {
        /// Highway designator, e.g. 405
        highway: String,

        /// Only this direction
        #[arg(long, value_parser = parse_direction)]
        direction: Option<Direction>,

        /// Hours of history to export
        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// CSV file to write
        #[arg(short, long, default_value = "export.csv")]
        output: String,

        /// Maximum number of archive files loaded concurrently
        #[arg(short, long, default_value_t = 8)]
        concurrency: usize,
    },
}

fn parse_direction(value: &str) -> Result<Direction, String> {
    Direction::try_from(value.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file
    let settings = Settings::from_env()?;

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = Path::new(&settings.log_file_path);
    let log_dir = log_file_path.parent().unwrap_or(Path::new("logs"));
    let log_file_name = log_file_path
        .file_name()
        .unwrap_or(OsStr::new("socal_traffic.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            source,
            sample_rate,
            num_samples,
            gzip,
            upload,
            output,
        } => {
            let source = source.unwrap_or_else(|| settings.data_url.clone());
            scrape(&settings, &source, sample_rate, num_samples, gzip, upload, &output).await?;
        }
        Commands::Download { days, date } => {
            let bucket = settings
                .s3_bucket
                .as_deref()
                .context("S3_BUCKET must be set to download")?;
            let dates: Vec<NaiveDate> = match date {
                Some(date) => vec![date],
                None => {
                    let today = Utc::now().date_naive();
                    (0..days).map(|i| today - Duration::days(i)).collect()
                }
            };
            let s3 = s3_client(settings.s3_endpoint_url.as_deref()).await;
            download_days(&s3, bucket, &dates, &settings.data_dir).await?;
        }
        Commands::Commute {
            route,
            period,
            days,
            bucket_minutes,
            weekdays,
            half_life_days,
            miles_per_sensor,
            output,
            upload,
            concurrency,
        } => {
            let topology = Arc::new(load_topology(&settings).await?);
            let book = route_book(&settings)?;
            let routes: Vec<Route> = match (&route, period) {
                (Some(name), _) => vec![book.get(name)?.clone()],
                (None, Some(period)) => book.for_period(period).cloned().collect(),
                (None, None) => book.routes.clone(),
            };

            let store = load_store(&settings, &topology, concurrency).await?;

            let mut query = CommuteQuery::last_days(Utc::now(), days)
                .with_bucket_minutes(bucket_minutes)
                .with_utc_offset(settings.utc_offset)
                .with_miles_per_sensor(miles_per_sensor);
            if !weekdays.is_empty() {
                query = query.with_weekdays(weekdays);
            }
            if let Some(half_life_days) = half_life_days {
                query = query.with_weighting(SampleWeighting::RecencyHalfLife { half_life_days });
            }

            let index = analyze(&topology, &store, &routes, &query)?;

            for report in &index.reports {
                for rec in report.recommendations.iter().take(3) {
                    info!(
                        route = %report.route,
                        rank = rec.rank,
                        departure = %rec.bucket.label(),
                        minutes = format!("{:.1}", rec.implied_duration_minutes),
                        mean_mph = format!("{:.1}", rec.mean_speed_mph),
                        incident_adjusted = rec.incident_adjusted,
                        "Recommendation"
                    );
                }
            }

            if let Some(path) = output {
                write_local(&index, &path)?;
            }
            if upload {
                match settings.s3_bucket.as_deref() {
                    Some(bucket) => {
                        let s3 = s3_client(settings.s3_endpoint_url.as_deref()).await;
                        publish(&s3, bucket, &index).await?;
                    }
                    None => info!("S3 bucket not specified, skipping upload"),
                }
            }
        }
        Commands::Status {
            period,
            minutes,
            miles_per_sensor,
            concurrency,
        } => {
            let topology = Arc::new(load_topology(&settings).await?);
            let book = route_book(&settings)?;
            let routes: Vec<Route> = match period {
                Some(period) => book.for_period(period).cloned().collect(),
                None => book.routes.clone(),
            };
            let store = load_store(&settings, &topology, concurrency).await?;

            let to = Utc::now();
            let statuses = current_status(
                &topology,
                &store,
                &routes,
                to - Duration::minutes(minutes),
                to,
                miles_per_sensor,
            )?;
            for status in &statuses {
                match status.travel_minutes {
                    Some(travel) => info!(
                        route = %status.route,
                        minutes = format!("{:.1}", travel),
                        mean_mph = ?status.mean_speed_mph,
                        slowest_mph = ?status.slowest_sensor_mph,
                        "Route status"
                    ),
                    None => warn!(route = %status.route, "No recent data for route"),
                }
            }
        }
        Commands::Slowdowns {
            threshold,
            hours,
            limit,
            concurrency,
        } => {
            let topology = Arc::new(load_topology(&settings).await?);
            let store = load_store(&settings, &topology, concurrency).await?;

            let to = Utc::now();
            let slowdowns = store.read(|snapshot| {
                find_slowdowns(&topology, snapshot, to - Duration::hours(hours), to, threshold)
            });
            for slowdown in slowdowns.iter().take(limit) {
                info!(
                    sensor = %slowdown.sensor_name,
                    route = ?slowdown.route,
                    direction = ?slowdown.direction,
                    mean_mph = format!("{:.0}", slowdown.mean_speed_mph),
                    "Slowdown"
                );
            }
            if slowdowns.is_empty() {
                info!(threshold, "No slowdowns found");
            }
        }
        Commands::Incidents {
            hours,
            limit,
            concurrency,
        } => {
            let topology = Arc::new(load_topology(&settings).await?);
            let store = load_store(&settings, &topology, concurrency).await?;

            let since = Utc::now() - Duration::hours(hours);
            store.read(|snapshot| {
                let incidents = recent_incidents(snapshot, since);
                for incident in incidents.iter().take(limit) {
                    let detail = incident.detail.as_ref();
                    info!(
                        id = incident.id,
                        start = detail.and_then(|d| d.start_time_iso.as_deref()).unwrap_or("?"),
                        location = detail.and_then(|d| d.location.as_deref()).unwrap_or(""),
                        description = detail.and_then(|d| d.description.as_deref()).unwrap_or(""),
                        "Incident"
                    );
                }
                if incidents.is_empty() {
                    info!(hours, "No recent incidents");
                }
            });
        }
        Commands::Stats { concurrency } => {
            let topology = Arc::new(load_topology(&settings).await?);
            let store = load_store(&settings, &topology, concurrency).await?;

            let stats = store.read(|snapshot| data_stats(&topology, snapshot));
            info!(
                readings = stats.total_readings,
                polls = stats.capture_count,
                sensors = stats.sensor_count,
                incidents = stats.incident_count,
                first = ?stats.first_capture,
                last = ?stats.last_capture,
                readings_per_hour = ?stats.readings_per_hour,
                "Data stats"
            );
        }
        Commands::Routes => {
            let topology = load_topology(&settings).await?;
            let summaries = topology.route_summaries();
            for summary in &summaries {
                info!(
                    route = %summary.route,
                    direction = %summary.direction,
                    sensors = summary.sensor_count,
                    "Route"
                );
            }
            info!(
                routes = summaries.len(),
                sensors = topology.sensor_count(),
                sections = topology.sections().count(),
                "Topology summary"
            );
        }
        Commands::Export {
            highway,
            direction,
            hours,
            output,
            concurrency,
        } => {
            let topology = Arc::new(load_topology(&settings).await?);
            let store = load_store(&settings, &topology, concurrency).await?;

            let to = Utc::now();
            let from = to - Duration::hours(hours);
            let mut rows: Vec<ExportRow> = store.read(|snapshot| {
                topology
                    .sensors()
                    .iter()
                    .filter(|s| s.route.as_deref() == Some(highway.as_str()))
                    .filter(|s| direction.is_none() || s.direction == direction)
                    .flat_map(|sensor| {
                        snapshot
                            .readings_for_sensor(sensor.index, from..to)
                            .map(|r| ExportRow {
                                timestamp: r.timestamp,
                                sensor_index: r.sensor_index,
                                sensor_name: sensor.name.clone(),
                                speed_mph: r.speed_mph,
                                has_incident: r.has_active_incident(),
                            })
                    })
                    .collect()
            });
            rows.sort_by_key(|r| (r.timestamp, r.sensor_index));

            if rows.is_empty() {
                warn!(highway = %highway, "No readings to export");
            }
            export_readings(&output, &rows)?;
        }
    }

    Ok(())
}

fn route_book(settings: &Settings) -> Result<RouteBook> {
    match &settings.routes_file {
        Some(path) => {
            RouteBook::load(path).with_context(|| format!("loading route book {path}"))
        }
        None => Ok(RouteBook::socal_commute()),
    }
}

/// Replays the local archive into a fresh store.
async fn load_store(
    settings: &Settings,
    topology: &Arc<Topology>,
    concurrency: usize,
) -> Result<SharedStore> {
    let store = SharedStore::default();
    backfill(&settings.data_dir, topology.clone(), &store, concurrency).await?;
    Ok(store)
}

#[tracing::instrument(skip(settings), fields(source = %settings.static_url))]
async fn load_topology(settings: &Settings) -> Result<Topology> {
    let client = BasicClient::new()?;
    let bytes = load_source(&client, &settings.static_url).await?;
    let topology = Topology::from_json(&bytes)?;
    info!(sensors = topology.sensor_count(), "Topology loaded");
    Ok(topology)
}

/// Polls the live payload `num_samples` times, archiving each poll and
/// recording its ingest stats. A failed poll is logged and recorded; the
/// loop carries on.
#[tracing::instrument(skip(settings, gzip, upload))]
async fn scrape(
    settings: &Settings,
    source: &str,
    sample_rate: u64,
    num_samples: usize,
    gzip: bool,
    upload: bool,
    output: &str,
) -> Result<()> {
    let topology = Arc::new(load_topology(settings).await?);
    let client = BasicClient::new()?;
    let store = SharedStore::default();

    let s3 = match (upload, settings.s3_bucket.as_deref()) {
        (true, Some(bucket)) => {
            info!(bucket = %bucket, gzip, "S3 upload enabled");
            Some((
                s3_client(settings.s3_endpoint_url.as_deref()).await,
                bucket.to_string(),
            ))
        }
        (true, None) => {
            warn!("S3 bucket not specified, skipping upload");
            None
        }
        (false, _) => None,
    };

    if num_samples == 0 {
        info!(sample_rate, "Sampling infinitely. Press Ctrl+C to stop.");
    } else {
        info!(num_samples, sample_rate, "Starting sample collection");
    }

    let mut sample_count = 0;

    loop {
        // Check if we've reached the sample limit (0 = infinite)
        if num_samples > 0 && sample_count >= num_samples {
            break;
        }
        sample_count += 1;

        let now = Utc::now();
        let url = if source.starts_with("http") {
            with_cache_buster(source, now)
        } else {
            source.to_string()
        };

        let fetch_start = std::time::Instant::now();
        let stats = match load_source(&client, &url).await {
            Ok(bytes) => {
                let elapsed = fetch_start.elapsed();
                if elapsed.as_secs() > 15 {
                    warn!(elapsed_secs = elapsed.as_secs(), "Fetch was slow");
                }
                debug!(bytes = bytes.len(), "Payload received, parsing");
                match parse_payload(&bytes).and_then(|p| normalize(&p, &topology, Some(now))) {
                    Ok(batch) => {
                        archive_batch(settings, &batch, gzip, s3.as_ref()).await;
                        let outcome = store.apply(batch.clone());
                        let stats = IngestStats::from_batch(&batch, &outcome).with_source(source);
                        info!(
                            sample = sample_count,
                            valid = stats.valid_readings,
                            total = stats.total_sensors,
                            incidents = stats.incidents,
                            coverage_pct = format!("{:.1}", stats.coverage_pct()),
                            "Poll processed"
                        );
                        stats
                    }
                    Err(e) => {
                        error!(error = %e, "Payload rejected");
                        IngestStats::from_error("parse_error", &e.to_string()).with_source(source)
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Fetch failed");
                IngestStats::from_error("fetch_error", &e.to_string()).with_source(source)
            }
        };

        if let Err(e) = append_record(output, &stats) {
            error!(error = %e, "Failed to write ingest stats");
        }

        // If not the last sample, wait before next iteration
        if num_samples == 0 || sample_count < num_samples {
            info!(sample_rate, "Waiting before next sample");
            tokio::time::sleep(tokio::time::Duration::from_secs(sample_rate)).await;
        }
    }

    info!(
        readings = store.read(|s| s.reading_count()),
        incidents = store.read(|s| s.incident_count()),
        "Finished scraping"
    );
    Ok(())
}

/// Writes the poll to the local archive and, when configured, to S3.
/// Failures are logged; the poll still counts.
async fn archive_batch(
    settings: &Settings,
    batch: &NormalizedBatch,
    gzip: bool,
    s3: Option<&(aws_sdk_s3::Client, String)>,
) {
    if let Err(e) = archive::write_local(&settings.data_dir, batch, gzip) {
        error!(error = %e, "Failed to archive poll locally");
    }

    if let Some((client, bucket)) = s3 {
        let key = archive::archive_key(batch.captured_at, gzip);
        let uploaded = match archive::encode(batch, gzip) {
            Ok(body) => archive::upload(client, bucket, &key, body).await,
            Err(e) => Err(e),
        };
        match uploaded {
            Ok(()) => debug!(key = %key, "Uploaded poll"),
            Err(e) => error!(key = %key, error = %e, "Failed to upload poll"),
        }
    }
}
