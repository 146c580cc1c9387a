pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod terrarium;

pub use aggregate::{merge_resource_info, Aggregator, OutputSource, DEFAULT_TARGET_SUFFIX};
pub use coordinator::RunCoordinator;
pub use error::RunError;
pub use terrarium::{ExecMode, TerrariumService};
