//! The scheduling core: priority routing, device allocation, and batch
//! coordination.

pub mod allocator;
pub mod coordinator;
pub mod router;

pub use allocator::{AlwaysHealthy, DeviceAllocator, DeviceProbe};
pub use coordinator::{BatchCoordinator, BatchOutcome, BatchSummary, JobRunResult};
pub use router::Tier;
