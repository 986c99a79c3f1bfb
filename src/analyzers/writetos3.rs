use serde::Serialize;

/// Serializes a report to JSON and uploads it with `application/json` content type.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    report: &impl Serialize,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec_pretty(report)?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json")
        .cache_control("no-cache")
        .send()
        .await?;

    Ok(())
}
