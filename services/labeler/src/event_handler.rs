use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use lambda_runtime::{Error, LambdaEvent};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::DetectionConfig;
use crate::label_detector::LabelDetector;
use crate::LabelerError;

const PROCESSED_BODY: &str = "File processed successfully!";

/// Fixed response returned once the event has been handled
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedResponse {
    pub status_code: u16,
    pub body: String,
}

impl ProcessedResponse {
    fn ok() -> Self {
        Self {
            status_code: 200,
            // The body is itself a JSON document
            body: serde_json::Value::from(PROCESSED_BODY).to_string(),
        }
    }
}

/// Owner identifiers encoded in the first two key segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOwner {
    pub user: String,
    pub task_id: String,
}

impl UploadOwner {
    /// Parse `{user}/{taskId}/...`
    pub fn from_key(key: &str) -> Result<Self, LabelerError> {
        let mut segments = key.split('/');
        match (segments.next(), segments.next()) {
            (Some(user), Some(task_id)) => Ok(Self {
                user: user.to_string(),
                task_id: task_id.to_string(),
            }),
            _ => Err(LabelerError::MalformedKey(key.to_string())),
        }
    }
}

/// Decode an S3 event key: `+` is a space, everything else is percent-encoded.
/// Invalid UTF-8 sequences become U+FFFD.
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[instrument(skip(record, detector, detection))]
async fn process_record<D: LabelDetector + ?Sized>(
    index: usize,
    record: &S3EventRecord,
    detector: &D,
    detection: &DetectionConfig,
) -> Result<(), LabelerError> {
    let bucket = record
        .s3
        .bucket
        .name
        .as_deref()
        .ok_or(LabelerError::MissingField("s3.bucket.name"))?;
    let raw_key = record
        .s3
        .object
        .key
        .as_deref()
        .ok_or(LabelerError::MissingField("s3.object.key"))?;
    let key = decode_object_key(raw_key);
    let owner = UploadOwner::from_key(&key)?;

    info!(
        bucket = %bucket,
        key = %key,
        user = %owner.user,
        task_id = %owner.task_id,
        "Processing uploaded object"
    );

    let labels = detector
        .detect_labels(bucket, &key, detection.max_labels, detection.min_confidence)
        .await?;

    let names: Vec<&str> = labels.iter().map(|label| label.name.as_str()).collect();
    info!(
        user = %owner.user,
        task_id = %owner.task_id,
        labels = ?names,
        "Labels detected"
    );

    Ok(())
}

pub async fn function_handler<D: LabelDetector + ?Sized>(
    event: LambdaEvent<S3Event>,
    detector: &D,
    detection: &DetectionConfig,
) -> Result<ProcessedResponse, Error> {
    let payload = event.payload;
    info!(event = ?payload, "Received S3 event");

    if payload.records.is_empty() {
        warn!("No records found in S3 event");
        return Ok(ProcessedResponse::ok());
    }

    for (index, record) in payload.records.iter().enumerate() {
        process_record(index, record, detector, detection).await?;
    }

    Ok(ProcessedResponse::ok())
}
