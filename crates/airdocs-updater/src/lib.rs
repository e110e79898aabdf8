mod config;
mod error;
mod logging;
mod orchestrator;
mod state;

pub use config::{build_release_source, SourceConfig, UpdaterConfig};
pub use error::UpdateError;
pub use logging::{init_logging, LOG_ENV};
pub use orchestrator::{StartupReport, Updater};
pub use state::{CancelToken, ProgressStage, UpdateEvent, UpdateState};
