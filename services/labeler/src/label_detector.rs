use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_rekognition::error::DisplayErrorContext;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client as RekognitionClient;
use serde::Serialize;
use tracing::{info, instrument};

use crate::LabelerError;

/// A label found in an image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f32,
}

/// Image-analysis capability: labels for an object already in S3
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect_labels(
        &self,
        bucket: &str,
        key: &str,
        max_labels: i32,
        min_confidence: f32,
    ) -> Result<Vec<DetectedLabel>, LabelerError>;
}

/// Rekognition-backed [`LabelDetector`]
pub struct RekognitionDetector {
    client: RekognitionClient,
}

impl RekognitionDetector {
    pub async fn new(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let aws_config = loader.load().await;

        Self::with_client(RekognitionClient::new(&aws_config))
    }

    pub fn with_client(client: RekognitionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LabelDetector for RekognitionDetector {
    #[instrument(skip(self))]
    async fn detect_labels(
        &self,
        bucket: &str,
        key: &str,
        max_labels: i32,
        min_confidence: f32,
    ) -> Result<Vec<DetectedLabel>, LabelerError> {
        let image = Image::builder()
            .s3_object(S3Object::builder().bucket(bucket).name(key).build())
            .build();

        let output = self
            .client
            .detect_labels()
            .image(image)
            .max_labels(max_labels)
            .min_confidence(min_confidence)
            .send()
            .await
            .map_err(|e| LabelerError::Detection {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        info!(labels = ?output.labels(), "Labels data");

        Ok(output
            .labels()
            .iter()
            .filter_map(|label| {
                label.name().map(|name| DetectedLabel {
                    name: name.to_string(),
                    confidence: label.confidence().unwrap_or_default(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_rekognition::operation::detect_labels::DetectLabelsOutput;
    use aws_sdk_rekognition::types::Label;
    use aws_smithy_mocks::{mock, mock_client};

    #[tokio::test]
    async fn test_detect_labels_sends_limits_and_maps_names() {
        let detect_rule = mock!(aws_sdk_rekognition::Client::detect_labels)
            .match_requests(|req| {
                let s3_object = req.image().and_then(|image| image.s3_object());
                req.max_labels() == Some(5)
                    && req.min_confidence() == Some(0.75)
                    && s3_object.and_then(|o| o.bucket()) == Some("uploads")
                    && s3_object.and_then(|o| o.name()) == Some("alice/task42/photo.jpg")
            })
            .then_output(|| {
                DetectLabelsOutput::builder()
                    .labels(Label::builder().name("Cat").confidence(98.5).build())
                    .labels(Label::builder().name("Pet").confidence(91.0).build())
                    .labels(Label::builder().confidence(80.0).build())
                    .build()
            });
        let client = mock_client!(aws_sdk_rekognition, [&detect_rule]);
        let detector = RekognitionDetector::with_client(client);

        let labels = detector
            .detect_labels("uploads", "alice/task42/photo.jpg", 5, 0.75)
            .await
            .unwrap();

        assert_eq!(detect_rule.num_calls(), 1);
        assert_eq!(
            labels,
            vec![
                DetectedLabel {
                    name: "Cat".to_string(),
                    confidence: 98.5,
                },
                DetectedLabel {
                    name: "Pet".to_string(),
                    confidence: 91.0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_detect_labels_without_results() {
        let detect_rule = mock!(aws_sdk_rekognition::Client::detect_labels)
            .then_output(|| DetectLabelsOutput::builder().build());
        let client = mock_client!(aws_sdk_rekognition, [&detect_rule]);
        let detector = RekognitionDetector::with_client(client);

        let labels = detector
            .detect_labels("uploads", "alice/task42/blank.png", 5, 0.75)
            .await
            .unwrap();

        assert!(labels.is_empty());
    }
}
