//! Environment-driven settings.
//!
//! Values come from the process environment, after `main` has loaded any
//! `.env` file with `dotenvy`.

use anyhow::{Context, Result};
use chrono::FixedOffset;
use std::path::PathBuf;

pub const DEFAULT_STATIC_URL: &str =
    "https://cdn-static.sigalert.com/240/Zip/RegionInfo/SoCalStatic.json";
pub const DEFAULT_DATA_URL: &str = "https://www.sigalert.com/Data/SoCal/4~j/SoCalData.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub static_url: String,
    pub data_url: String,
    pub data_dir: PathBuf,
    pub s3_bucket: Option<String>,
    /// Set for S3-compatible stores such as R2.
    pub s3_endpoint_url: Option<String>,
    pub routes_file: Option<String>,
    pub utc_offset: FixedOffset,
    pub log_file_path: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let offset_minutes: i32 = match get("COMMUTE_UTC_OFFSET_MINUTES") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("COMMUTE_UTC_OFFSET_MINUTES is not an integer: {raw}"))?,
            None => -480,
        };
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60)
            .with_context(|| format!("COMMUTE_UTC_OFFSET_MINUTES out of range: {offset_minutes}"))?;

        Ok(Settings {
            static_url: get("STATIC_URL").unwrap_or_else(|| DEFAULT_STATIC_URL.to_string()),
            data_url: get("DATA_URL").unwrap_or_else(|| DEFAULT_DATA_URL.to_string()),
            data_dir: PathBuf::from(get("TRAFFIC_DATA_DIR").unwrap_or_else(|| "data".to_string())),
            s3_bucket: get("S3_BUCKET"),
            s3_endpoint_url: get("S3_ENDPOINT_URL"),
            routes_file: get("ROUTES_FILE"),
            utc_offset,
            log_file_path: get("LOG_FILE_PATH")
                .unwrap_or_else(|| "logs/socal_traffic.log".to_string()),
        })
    }
}

/// S3 client from the ambient AWS configuration, pointed at `endpoint_url`
/// when one is set.
pub async fn s3_client(endpoint_url: Option<&str>) -> aws_sdk_s3::Client {
    let config = aws_config::load_from_env().await;
    match endpoint_url {
        Some(url) => {
            let s3_config = aws_sdk_s3::config::Builder::from(&config)
                .endpoint_url(url)
                .force_path_style(true)
                .build();
            aws_sdk_s3::Client::from_conf(s3_config)
        }
        None => aws_sdk_s3::Client::new(&config),
    }
}
