use crate::analyzers::aggregate::aggregate_commute;
use crate::analyzers::types::{CommuteIndex, CommuteQuery, CommuteReport};
use crate::analyzers::writetos3::write_json_to_s3;
use crate::routes::{Route, resolve_route};
use crate::store::SharedStore;
use crate::topology::Topology;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Runs `query` for every route against one snapshot of the store.
///
/// Routes with a commute period and a query without a time-of-day range get
/// the period's range.
pub fn analyze(
    topology: &Topology,
    store: &SharedStore,
    routes: &[Route],
    query: &CommuteQuery,
) -> Result<CommuteIndex> {
    let resolved = routes
        .iter()
        .map(|route| -> Result<_> {
            let route_query = match (route.period, query.time_of_day) {
                (Some(period), None) => {
                    let (start, end) = period.time_range();
                    query.clone().with_time_of_day(start, end)
                }
                _ => query.clone(),
            };
            Ok((resolve_route(route, topology)?, route_query))
        })
        .collect::<Result<Vec<_>>>()?;

    let reports = store.read(|snapshot| {
        resolved
            .iter()
            .map(|(route, route_query)| {
                aggregate_commute(route, route_query, snapshot)
                    .with_context(|| format!("aggregating route `{}`", route.name))
            })
            .collect::<Result<Vec<CommuteReport>>>()
    })?;

    for report in &reports {
        match report.recommendations.first() {
            Some(best) => info!(
                route = %report.route,
                departure = %best.bucket.label(),
                minutes = best.implied_duration_minutes,
                "Best departure"
            ),
            None => warn!(route = %report.route, "Not enough data for any departure"),
        }
    }

    Ok(CommuteIndex {
        generated_at: Utc::now(),
        reports,
    })
}

/// Writes the index as pretty JSON, creating parent directories.
pub fn write_local(index: &CommuteIndex, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(index)?)?;
    info!("Wrote commute report to {}", path.display());
    Ok(())
}

pub fn report_key(date: NaiveDate) -> String {
    format!("reports/commute/{}.json", date.format("%Y-%m-%d"))
}

/// Uploads the index under its dated key and as `reports/commute/latest.json`.
pub async fn publish(
    s3: &aws_sdk_s3::Client,
    bucket: &str,
    index: &CommuteIndex,
) -> Result<()> {
    let key = report_key(index.generated_at.date_naive());
    write_json_to_s3(s3, bucket, &key, index).await?;
    write_json_to_s3(s3, bucket, "reports/commute/latest.json", index).await?;
    info!("Published commute report to s3://{}/{}", bucket, key);
    Ok(())
}
