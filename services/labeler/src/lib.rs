//! Postboard Upload Labeler
//!
//! Lambda function subscribed to the upload bucket's object-created events.
//! For each uploaded object it recovers the owning user and task from the key
//! (`{user}/{taskId}/{file}`) and asks Rekognition for labels, which are
//! logged.

pub mod config;
pub mod event_handler;
pub mod label_detector;

pub use config::{DetectionConfig, LabelerConfig};
pub use event_handler::{function_handler, ProcessedResponse, UploadOwner};
pub use label_detector::{DetectedLabel, LabelDetector, RekognitionDetector};

#[derive(Debug, thiserror::Error)]
pub enum LabelerError {
    #[error("S3 event record is missing {0}")]
    MissingField(&'static str),
    #[error("object key {0:?} does not start with {{user}}/{{taskId}}/")]
    MalformedKey(String),
    #[error("label detection failed for {key}: {message}")]
    Detection { key: String, message: String },
}
