use lambda_runtime::{run, service_fn, Error};
use postboard_labeler::{function_handler, LabelerConfig, RekognitionDetector};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = LabelerConfig::load()?;

    init_tracing(&config.service.log_level);

    info!(service = %config.service.name, "Loading function");

    let detector = RekognitionDetector::new(config.region.as_deref()).await;
    let detection = config.detection.clone();

    run(service_fn(|event| function_handler(event, &detector, &detection))).await
}

/// Initialize tracing/logging; CloudWatch adds its own timestamps
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().without_time())
        .init();
}
