//! Query status model and the query service collaborators.

mod memory;
mod status;
mod traits;

pub use memory::{ManagementCall, MemoryQueryStore, RecordingQueryManagement};
pub use status::{QueryState, QueryStatus};
pub use traits::{QueryManagement, QueryServiceError, QueryStatusStore, ResultQueueManager};
