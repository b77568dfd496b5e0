pub mod kernel;

// Re-export specific items for convenient access
pub use kernel::config::PipelineConfig;
pub use kernel::coordinator::{Coordinator, CoordinatorState, IngestHandle};
pub use kernel::error::{ConfigError, IngestError};
pub use kernel::event::{Batch, Message, OriginTag};
