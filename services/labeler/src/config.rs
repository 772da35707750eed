use serde::Deserialize;

/// Configuration for the upload labeling function
#[derive(Debug, Clone, Deserialize)]
pub struct LabelerConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    /// AWS region override; the Lambda environment's region otherwise
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Label detection request parameters
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Maximum number of labels returned per image
    #[serde(default = "default_max_labels")]
    pub max_labels: i32,
    /// Minimum confidence a label needs to be returned
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_service_name() -> String {
    "postboard-labeler".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_labels() -> i32 {
    5
}

fn default_min_confidence() -> f32 {
    0.75
}

impl LabelerConfig {
    /// Load configuration from environment and config files
    ///
    /// `LABELER__DETECTION__MAX_LABELS` -> `detection.max_labels`
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/labeler").required(false))
            .add_source(
                config::Environment::with_prefix("LABELER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_labels: default_max_labels(),
            min_confidence: default_min_confidence(),
        }
    }
}
