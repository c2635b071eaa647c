//! sonohealth: acoustic machine health monitoring.
//! Learns a machine's healthy sound from a reference recording and scores
//! new audio against it, live or offline, per machine or across a fleet.

pub mod audio;
pub mod cancellation;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod events;
pub mod features;
pub mod fleet;
pub mod gmia;
pub mod metrics;
pub mod model;
pub mod scoring;
pub mod smart_start;
pub mod smoothing;
pub mod stats;
pub mod store;

pub use audio::{start_session, AudioSink, SessionHandle, SessionParams};
pub use cancellation::SessionControl;
pub use config::AppConfig;
pub use diagnosis::DiagnosisEngine;
pub use error::{CoreError, Result};
pub use features::FeatureExtractor;
pub use fleet::{rank_fleet, FleetEntry, FleetRanking};
pub use gmia::{score_frame, train_model};
pub use model::{DiagnosisResult, FeatureVector, GmiaModel, HealthStatus, ModelType, TrainingData};
pub use smart_start::{Phase, SmartStart};
pub use store::{MachineStore, MemoryStore, ModelHandle, SqliteStore};

use tracing_subscriber::EnvFilter;

/// Set to `json` for one JSON object per log line.
pub const LOG_FORMAT_ENV_VAR: &str = "SONOHEALTH_LOG_FORMAT";

/// Install the global subscriber. Logs go to stderr; `RUST_LOG` overrides
/// the default `sonohealth=info` filter. Safe to call more than once.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sonohealth=info"));
    let json = std::env::var(LOG_FORMAT_ENV_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_ok() {
        tracing::debug!(json, "tracing initialised");
    }
}
