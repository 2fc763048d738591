//! Turns a CSV manifest of tile coordinates into a `Run` row plus one
//! queued message per tile. Mirrors the original ingestion script: the
//! run id is derived from the manifest's own identity (bucket, key, ETag)
//! so re-running the same upload is idempotent, and messages are sent to
//! SQS in batches of ten.

use std::io::Read as _;

use anyhow::{bail, Context, Result};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sqs::Client as SqsClient;
use clap::Parser;
use pyrolysis_core::{init_logging, IngestionConfig};
use pyrolysis_store::{DynamoStoreClient, RunsRepository};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

const SEND_BATCH_SIZE: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "tile-ingest", about = "Loads a CSV tile manifest into a run and queue")]
struct Args {
    #[command(flatten)]
    config: IngestionConfig,

    /// S3 bucket holding the CSV manifest.
    #[arg(long)]
    manifest_bucket: String,

    /// S3 key of the CSV manifest.
    #[arg(long)]
    manifest_key: String,

    /// Parse and report counts without creating a run or sending messages.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
struct SourceRef {
    bucket: String,
    key: String,
}

#[derive(Debug, Clone, serde::Serialize)]
struct TileJobPayload {
    run_id: String,
    imagery_source: &'static str,
    source: SourceRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    z: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zoom: Option<u32>,
}

enum Source {
    Mapbox,
    Google,
}

impl Source {
    fn as_str(&self) -> &'static str {
        match self {
            Source::Mapbox => "mapbox",
            Source::Google => "google",
        }
    }
}

fn is_blank_row(record: &csv::StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

fn detect_source_from_header(header: &csv::StringRecord) -> Result<Source> {
    let has = |name: &str| header.iter().any(|field| field.eq_ignore_ascii_case(name));
    if has("z") && has("x") && has("y") {
        Ok(Source::Mapbox)
    } else if has("lat") && has("lon") {
        Ok(Source::Google)
    } else {
        bail!("manifest header has neither z/x/y nor lat/lon columns")
    }
}

fn parse_mapbox_row(record: &csv::StringRecord, header: &csv::StringRecord, run_id: &str, source: SourceRef) -> Result<TileJobPayload> {
    let field = |name: &str| -> Result<&str> {
        let idx = header.iter().position(|f| f.eq_ignore_ascii_case(name));
        idx.and_then(|i| record.get(i)).with_context(|| format!("row missing column {name}"))
    };

    Ok(TileJobPayload {
        run_id: run_id.to_string(),
        imagery_source: "mapbox",
        source,
        z: Some(field("z")?.parse().context("z must be an integer")?),
        x: Some(field("x")?.parse().context("x must be an integer")?),
        y: Some(field("y")?.parse().context("y must be an integer")?),
        region: header
            .iter()
            .position(|f| f.eq_ignore_ascii_case("region"))
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        lat: None,
        lon: None,
        zoom: None,
    })
}

fn parse_google_row(record: &csv::StringRecord, header: &csv::StringRecord, run_id: &str, source: SourceRef) -> Result<TileJobPayload> {
    let field = |name: &str| -> Result<&str> {
        let idx = header.iter().position(|f| f.eq_ignore_ascii_case(name));
        idx.and_then(|i| record.get(i)).with_context(|| format!("row missing column {name}"))
    };

    let zoom = header
        .iter()
        .position(|f| f.eq_ignore_ascii_case("zoom"))
        .and_then(|i| record.get(i))
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>())
        .transpose()
        .context("zoom must be an integer")?;

    Ok(TileJobPayload {
        run_id: run_id.to_string(),
        imagery_source: "google",
        source,
        z: None,
        x: None,
        y: None,
        region: None,
        lat: Some(field("lat")?.parse().context("lat must be a float")?),
        lon: Some(field("lon")?.parse().context("lon must be a float")?),
        zoom,
    })
}

fn compute_run_id(bucket: &str, key: &str, etag: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{bucket}:{key}:{etag}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("run_{}", &digest[..12])
}

/// Fetches the manifest body, stripping a UTF-8 BOM if present (Excel and
/// some GIS tools prepend one), and returns it alongside the object's
/// ETag, used as the run-id entropy source.
async fn fetch_manifest(s3: &S3Client, bucket: &str, key: &str) -> Result<(String, String)> {
    let head = s3.head_object().bucket(bucket).key(key).send().await.context("failed to head manifest object")?;
    let etag = head.e_tag().unwrap_or_default().trim_matches('"').to_string();

    let object = s3.get_object().bucket(bucket).key(key).send().await.context("failed to get manifest object")?;
    let bytes = object.body.collect().await.context("failed to read manifest body")?.into_bytes();

    let mut text = String::new();
    let mut reader: &[u8] = &bytes;
    reader.read_to_string(&mut text).context("manifest is not valid UTF-8")?;
    let text = text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text);

    Ok((text, etag))
}

async fn send_batch(sqs: &SqsClient, queue_url: &str, payloads: &[TileJobPayload]) -> Result<()> {
    let entries: Vec<_> = payloads
        .iter()
        .enumerate()
        .map(|(i, payload)| {
            aws_sdk_sqs::types::SendMessageBatchRequestEntry::builder()
                .id(i.to_string())
                .message_body(serde_json::to_string(payload).expect("payload is always serializable"))
                .build()
                .expect("batch entry is always buildable")
        })
        .collect();

    sqs.send_message_batch()
        .queue_url(queue_url)
        .set_entries(Some(entries))
        .send()
        .await
        .context("failed to send message batch")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.config.log_level);

    let started_at = chrono::Utc::now();

    let region_provider = aws_config::Region::new(args.config.aws_region.clone());
    let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    let s3 = S3Client::new(&shared_config);
    let sqs = SqsClient::new(&shared_config);

    let (manifest_text, etag) = fetch_manifest(&s3, &args.manifest_bucket, &args.manifest_key).await?;
    let run_id = compute_run_id(&args.manifest_bucket, &args.manifest_key, &etag);

    let mut csv_reader = csv::Reader::from_reader(manifest_text.as_bytes());
    let header = csv_reader.headers().context("manifest has no header row")?.clone();
    let source_kind = detect_source_from_header(&header)?;

    let source_ref = SourceRef { bucket: args.manifest_bucket.clone(), key: args.manifest_key.clone() };

    let mut payloads = Vec::new();
    for result in csv_reader.records() {
        let record = result.context("malformed CSV row")?;
        if is_blank_row(&record) {
            continue;
        }
        let payload = match source_kind {
            Source::Mapbox => parse_mapbox_row(&record, &header, &run_id, source_ref.clone())?,
            Source::Google => parse_google_row(&record, &header, &run_id, source_ref.clone())?,
        };
        payloads.push(payload);
    }

    let total = payloads.len() as u64;
    info!(run_id = %run_id, total, "manifest parsed");

    if args.dry_run {
        warn!("dry run: skipping run creation and message send");
    } else {
        let ddb = DynamoStoreClient::connect(&args.config.aws_region).await?;
        let runs = RunsRepository::new(ddb, args.config.runs_table.clone());
        let now = chrono::Utc::now().timestamp();
        runs.try_create_run(&run_id, &args.manifest_bucket, &args.manifest_key, 0, now).await?;

        for chunk in payloads.chunks(SEND_BATCH_SIZE) {
            send_batch(&sqs, &args.config.tile_jobs_queue_url, chunk).await?;
        }

        runs.set_total_tiles(&run_id, total).await?;
    }

    let elapsed = (chrono::Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
    println!("run_id={run_id} source={} total={total} elapsed={elapsed:.2}s", source_kind.as_str());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn run_id_is_deterministic_and_prefixed() {
        let a = compute_run_id("bucket", "manifests/run1.csv", "etag-123");
        let b = compute_run_id("bucket", "manifests/run1.csv", "etag-123");
        assert_eq!(a, b);
        assert!(a.starts_with("run_"));
        assert_eq!(a.len(), "run_".len() + 12);
    }

    #[test]
    fn run_id_changes_with_etag() {
        let a = compute_run_id("bucket", "key", "etag-1");
        let b = compute_run_id("bucket", "key", "etag-2");
        assert_ne!(a, b);
    }

    #[test]
    fn detects_mapbox_header() {
        let header = csv::StringRecord::from(vec!["z", "x", "y", "region"]);
        assert!(matches!(detect_source_from_header(&header).unwrap(), Source::Mapbox));
    }

    #[test]
    fn detects_google_header() {
        let header = csv::StringRecord::from(vec!["lat", "lon", "zoom"]);
        assert!(matches!(detect_source_from_header(&header).unwrap(), Source::Google));
    }

    #[test]
    fn rejects_unrecognized_header() {
        let header = csv::StringRecord::from(vec!["foo", "bar"]);
        assert!(detect_source_from_header(&header).is_err());
    }

    #[test]
    fn blank_row_is_detected() {
        let record = csv::StringRecord::from(vec!["", "  ", ""]);
        assert!(is_blank_row(&record));
    }

    #[test]
    fn row_with_any_nonempty_field_is_not_blank() {
        let record = csv::StringRecord::from(vec!["14", "", ""]);
        assert!(!is_blank_row(&record));
    }

    #[test]
    fn parses_mapbox_manifest_from_a_file_on_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "z,x,y,region").unwrap();
        writeln!(file, "14,8716,5378,nw").unwrap();
        writeln!(file, "14,8717,5378,").unwrap();
        writeln!(file, ",,,").unwrap();

        let mut reader = csv::Reader::from_path(file.path()).unwrap();
        let header = reader.headers().unwrap().clone();
        let source_ref = SourceRef { bucket: "b".into(), key: "k".into() };

        let rows: Vec<_> = reader
            .records()
            .map(|r| r.unwrap())
            .filter(|record| !is_blank_row(record))
            .map(|record| parse_mapbox_row(&record, &header, "run_abc123456789", source_ref.clone()).unwrap())
            .collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].z, Some(14));
        assert_eq!(rows[0].region, Some("nw".to_string()));
        assert_eq!(rows[1].region, None);
    }
}
