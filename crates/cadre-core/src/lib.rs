pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use condition::Condition;
pub use config::OrchestratorConfig;
pub use error::{CadreError, Result};
pub use event::{EventBus, LogSink, OrchestrationEvent};
pub use traits::{Capability, FnCapability, Summarizer, TelemetrySink};
pub use types::*;
