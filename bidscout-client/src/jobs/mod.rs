//! Background jobs for the BidScout client.
//!
//! - `cleanup`: periodic eviction, TTL purge and telemetry trimming

pub mod cleanup;

pub use cleanup::{
    CleanupConfig, CleanupContext, CleanupMetrics, CleanupScheduler, CleanupSnapshot, CycleReport,
};
