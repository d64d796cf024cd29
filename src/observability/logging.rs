//! Structured logging.
//!
//! Every subsystem logs through `tracing` with a `service` field naming the
//! originating subsystem (`server`, `worker`, `shutdown`, `setup-db`), so one sink
//! carries severity, subsystem, message and error detail.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::LogFormat;

const DEFAULT_FILTER: &str = "engine_host=info,setup_db=info,engine=info,tower_http=info";

/// Initialise the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Logging already initialised");
    }
}
