//! # Plan Cache
//!
//! 已持久化計劃的增量重算、鎖與記憶體存放區

pub mod dirty_tracking;
pub mod incremental;
pub mod locks;
pub mod memory_store;

// Re-export 主要類型
pub use dirty_tracking::DirtyTracker;
pub use incremental::{FacilityChange, Recalculation, StepEdit, StepRecalculator};
pub use locks::{LockGuard, PlanLocks};
pub use memory_store::InMemoryPlanStore;
