use std::{sync::Once, time::Instant};

use metrics::{Unit, describe_counter, describe_histogram, histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const STARTUP_STEP_MS: &str = "bookshelf_startup_step_ms";
pub const PUBSUB_TOPIC_CREATED_TOTAL: &str = "bookshelf_pubsub_topic_created_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Wall-clock timer for one bootstrap step, recorded when [`StepTimer::finish`] is called.
#[derive(Debug)]
pub struct StepTimer {
    step: &'static str,
    started: Instant,
}

impl StepTimer {
    pub fn start(step: &'static str) -> Self {
        Self {
            step,
            started: Instant::now(),
        }
    }

    pub fn finish(self) -> f64 {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        histogram!(STARTUP_STEP_MS, "step" => self.step).record(elapsed_ms);
        elapsed_ms
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_histogram!(
            STARTUP_STEP_MS,
            Unit::Milliseconds,
            "Time spent constructing each startup handle."
        );
        describe_counter!(
            PUBSUB_TOPIC_CREATED_TOTAL,
            Unit::Count,
            "Number of times startup had to create the Pub/Sub topic."
        );
    });
}
