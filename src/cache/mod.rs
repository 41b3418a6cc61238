//! # Working-Set Cache Management
//!
//! Growth monitoring, optimization and memory guarding for the ephemeral
//! cache used during sync runs.

pub mod compression;
pub mod fragmentation;
pub mod growth_manager;
pub mod memory_probe;

pub use compression::{compress_json, decompress_json, CompressedPayload};
pub use fragmentation::{efficiency_score, fragment, reassemble, Fragment, FragmentPart, PathSegment};
pub use growth_manager::{
    CacheGrowthManager, EmergencyCleanupReport, EntryOptions, GrowthAlert, MemoryReport,
    MemoryStatus, OptimizationOutcome, OptimizationStrategy,
};
pub use memory_probe::{FixedMemoryProbe, MemoryProbe, SystemMemoryProbe};
