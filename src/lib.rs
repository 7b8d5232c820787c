pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod processing;
pub mod types;

pub use config::{load_config, FlowConfig};
pub use db::FlowDb;
pub use error::{FlowError, Result};
pub use processing::{FlowWorker, NotificationPump, PumpHandle};
pub use types::*;
