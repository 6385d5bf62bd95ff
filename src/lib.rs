pub mod analyzer;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod monitor;
pub mod storage;

pub use analyzer::{AnalysisResult, EquipmentId};
pub use config::AppConfig;
pub use error::PpeError;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
