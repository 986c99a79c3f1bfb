//! Compact on-disk and S3 archive of polls.
//!
//! Each poll is stored as `data/YYYY-MM-DD/HH/MMSS.json[.gz]` (UTC capture
//! time) in the compact `{t, s, i}` shape, which reads back through the
//! same normalizer as a live payload. Locally the `data/` prefix is the
//! archive directory itself.

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::ingest::{NormalizedBatch, normalize};
use crate::parser::parse_payload;
use crate::store::SharedStore;
use crate::topology::Topology;

const KEY_PREFIX: &str = "data";

#[derive(Serialize)]
struct CompactPayload<'a> {
    t: DateTime<Utc>,
    s: Vec<(Option<f64>, Vec<(i64, u64)>)>,
    i: Vec<(u64, Option<&'a str>, Option<&'a str>, Option<&'a str>)>,
}

/// Serializes a batch in the compact archive shape. Placeholder incidents
/// are left out; their references rebuild them on load.
pub fn to_compact_json(batch: &NormalizedBatch) -> Result<Vec<u8>> {
    let payload = CompactPayload {
        t: batch.captured_at,
        s: batch
            .readings
            .iter()
            .map(|r| {
                let refs = r
                    .incident_refs
                    .iter()
                    .map(|ir| (ir.kind.code(), ir.incident_id))
                    .collect();
                (r.speed_mph, refs)
            })
            .collect(),
        i: batch
            .incidents
            .values()
            .filter_map(|o| {
                let d = o.detail.as_ref()?;
                Some((
                    o.incident_id,
                    d.location.as_deref(),
                    d.description.as_deref(),
                    d.start_time_iso.as_deref(),
                ))
            })
            .collect(),
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Compact JSON, gzip-compressed when `gzip` is set.
pub fn encode(batch: &NormalizedBatch, gzip: bool) -> Result<Vec<u8>> {
    let json = to_compact_json(batch)?;
    if !gzip {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// `YYYY-MM-DD/HH/MMSS.json[.gz]`, relative to the archive root.
pub fn archive_path(captured_at: DateTime<Utc>, gzip: bool) -> String {
    let ext = if gzip { "json.gz" } else { "json" };
    format!("{}.{}", captured_at.format("%Y-%m-%d/%H/%M%S"), ext)
}

/// Object key of a poll: `data/` plus [`archive_path`].
pub fn archive_key(captured_at: DateTime<Utc>, gzip: bool) -> String {
    format!("{}/{}", KEY_PREFIX, archive_path(captured_at, gzip))
}

/// Recovers the capture time from an archive path, for payloads that do not
/// carry their own.
pub fn captured_at_from_path(path: &Path) -> Option<DateTime<Utc>> {
    let file = path.file_name()?.to_str()?;
    let stem = file.split('.').next()?;
    let hour = path.parent()?.file_name()?.to_str()?;
    let date = path.parent()?.parent()?.file_name()?.to_str()?;
    NaiveDateTime::parse_from_str(&format!("{date} {hour}{stem}"), "%Y-%m-%d %H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Writes the batch under `dir` and returns the file path.
pub fn write_local(dir: &Path, batch: &NormalizedBatch, gzip: bool) -> Result<PathBuf> {
    let path = dir.join(archive_path(batch.captured_at, gzip));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, encode(batch, gzip)?)
        .with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), "Archived poll");
    Ok(path)
}

#[tracing::instrument(skip(client, body), fields(bytes = body.len()))]
pub async fn upload(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
) -> Result<()> {
    let content_type = if key.ends_with(".gz") {
        "application/gzip"
    } else {
        "application/json"
    };

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type(content_type)
        .send()
        .await
        .with_context(|| format!("uploading s3://{bucket}/{key}"))?;

    Ok(())
}

fn archive_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            archive_files(&path, out)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".json") || n.ends_with(".json.gz"))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn load_file(path: &Path, topology: &Topology) -> Result<NormalizedBatch> {
    let bytes = std::fs::read(path)?;
    let payload = parse_payload(&bytes)?;
    Ok(normalize(&payload, topology, captured_at_from_path(path))?)
}

/// Loads and normalizes every archived poll under `dir`, at most
/// `concurrency` files at a time. Files that fail to load are logged and
/// skipped. Batches come back in capture order.
#[tracing::instrument(skip(topology))]
pub async fn load_dir(
    dir: &Path,
    topology: Arc<Topology>,
    concurrency: usize,
) -> Result<Vec<NormalizedBatch>> {
    let mut files = Vec::new();
    if dir.exists() {
        archive_files(dir, &mut files)?;
    } else {
        warn!(dir = %dir.display(), "Archive directory does not exist");
    }
    files.sort();

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(files.len());

    for path in files {
        let sem = semaphore.clone();
        let topology = topology.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await?;
            let loaded = tokio::task::spawn_blocking({
                let path = path.clone();
                move || load_file(&path, &topology)
            })
            .await?;
            Ok::<_, anyhow::Error>((path, loaded))
        }));
    }

    let mut batches = Vec::new();
    for task in tasks {
        match task.await? {
            Ok((_, Ok(batch))) => batches.push(batch),
            Ok((path, Err(e))) => {
                error!(path = %path.display(), error = %e, "Skipping archived poll")
            }
            Err(e) => error!(error = %e, "Archive load task failed"),
        }
    }

    batches.sort_by_key(|b| b.captured_at);
    Ok(batches)
}

/// What a backfill applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSummary {
    pub batches: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Loads the archive under `dir` into `store`.
pub async fn backfill(
    dir: &Path,
    topology: Arc<Topology>,
    store: &SharedStore,
    concurrency: usize,
) -> Result<BackfillSummary> {
    let mut summary = BackfillSummary::default();
    for batch in load_dir(dir, topology, concurrency).await? {
        let outcome = store.apply(batch);
        summary.batches += 1;
        summary.inserted += outcome.inserted;
        summary.duplicates += outcome.duplicates;
    }
    info!(
        batches = summary.batches,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        "Backfill complete"
    );
    Ok(summary)
}

/// Mirrors the archived polls of `dates` from S3 into `dest`. Files already
/// present are not downloaded again. Returns the number downloaded.
#[tracing::instrument(skip(client, dates), fields(days = dates.len()))]
pub async fn download_days(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    dates: &[NaiveDate],
    dest: &Path,
) -> Result<usize> {
    let mut downloaded = 0;

    for date in dates {
        let prefix = format!("{}/{}/", KEY_PREFIX, date.format("%Y-%m-%d"));
        let mut pages = client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        let mut found = 0;
        while let Some(page) = pages.next().await {
            let page = page.with_context(|| format!("listing s3://{bucket}/{prefix}"))?;
            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                found += 1;

                let relative = key
                    .strip_prefix(KEY_PREFIX)
                    .map(|k| k.trim_start_matches('/'))
                    .unwrap_or(key);
                let path = dest.join(relative);
                if path.exists() {
                    continue;
                }

                let resp = match client.get_object().bucket(bucket).key(key).send().await {
                    Ok(resp) => resp,
                    Err(e) => {
                        error!(key, error = %e, "Download failed");
                        continue;
                    }
                };
                let data = resp.body.collect().await?.into_bytes();

                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &data).await?;
                downloaded += 1;
            }
        }

        info!(date = %date, found, "Listed archived polls");
    }

    info!(downloaded, "S3 download complete");
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_payload;
    use chrono::TimeZone;
    use serde_json::json;

    fn topology() -> Topology {
        Topology::from_json(
            &serde_json::to_vec(&json!({
                "sensorNames": ["A", "B", "C"],
                "sensorPositions": [[0, 0, 0, 0], [1, 0, 0, 0], [2, 0, 0, 0]],
                "roadSections": [[1, "South", "405", 0, 2]],
                "roads": {"1": ["405", 0, 0, [[0, 2, 65]]]}
            }))
            .unwrap(),
        )
        .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 13, 15, 40, 5).unwrap()
    }

    fn live_batch(topology: &Topology) -> NormalizedBatch {
        let payload = parse_payload(
            &serde_json::to_vec(&json!({
                "speeds": [[70, null, [[1, 9]]], [null, null, [[1, 12]]], [60, null, []]],
                "incidents": [[1, 9, "7:42 AM", "I-405 S", "Crash", 2, 1, 2, "2026-01-13T15:30:00Z", "u"]]
            }))
            .unwrap(),
        )
        .unwrap();
        normalize(&payload, topology, Some(t0())).unwrap()
    }

    #[test]
    fn test_archive_key() {
        assert_eq!(archive_key(t0(), false), "data/2026-01-13/15/4005.json");
        assert_eq!(archive_key(t0(), true), "data/2026-01-13/15/4005.json.gz");
    }

    #[test]
    fn test_captured_at_from_path() {
        let path = Path::new("/tmp/archive/2026-01-13/15/4005.json.gz");
        assert_eq!(captured_at_from_path(path), Some(t0()));
        assert_eq!(captured_at_from_path(Path::new("notes.json")), None);
    }

    #[test]
    fn test_compact_archive_reads_back_identically() {
        let topology = topology();
        let batch = live_batch(&topology);

        for gzip in [false, true] {
            let reloaded =
                normalize(&parse_payload(&encode(&batch, gzip).unwrap()).unwrap(), &topology, None)
                    .unwrap();

            assert_eq!(reloaded.captured_at, batch.captured_at);
            assert_eq!(reloaded.readings, batch.readings);
            let crash = reloaded.incidents[&9].detail.as_ref().unwrap();
            assert_eq!(crash.description.as_deref(), Some("Crash"));
            assert_eq!(crash.start_time_iso.as_deref(), Some("2026-01-13T15:30:00Z"));
            assert!(reloaded.incidents[&12].is_placeholder());
        }
    }

    #[tokio::test]
    async fn test_load_dir_skips_bad_files() {
        let topology = Arc::new(topology());
        let dir = tempfile::tempdir().unwrap();

        let written = write_local(dir.path(), &live_batch(&topology), true).unwrap();
        assert!(written.ends_with("2026-01-13/15/4005.json.gz"));

        let bad = dir.path().join("2026-01-13").join("15").join("4500.json");
        std::fs::write(&bad, b"{\"speeds\": [[1, null, []]]}").unwrap();
        std::fs::write(dir.path().join("README.txt"), b"not an archive").unwrap();

        let batches = load_dir(dir.path(), topology.clone(), 2).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].captured_at, t0());

        let store = SharedStore::default();
        let summary = backfill(dir.path(), topology, &store, 2).await.unwrap();
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.inserted, 3);
        assert_eq!(store.read(|s| s.incident_count()), 2);
    }

    #[tokio::test]
    async fn test_live_payload_in_archive_takes_time_from_path() {
        let topology = Arc::new(topology());
        let dir = tempfile::tempdir().unwrap();
        let hour = dir.path().join("2026-01-13").join("15");
        std::fs::create_dir_all(&hour).unwrap();
        std::fs::write(
            hour.join("4005.json"),
            serde_json::to_vec(&json!({
                "speeds": [[70, null, []], [null, null, []], [60, null, []]]
            }))
            .unwrap(),
        )
        .unwrap();

        let batches = load_dir(dir.path(), topology, 1).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].captured_at, t0());
        assert_eq!(batches[0].valid_readings(), 2);
    }
}
