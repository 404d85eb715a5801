//! ais-core: Pure AIS encoding + broadcast scheduling library.
//!
//! No async, no I/O, just algorithms. Turns merged fleet snapshots into
//! `!AIVDM` sentences and decides which of them each cycle should carry.
//! Used by `ais-server` (fetchers, sockets and the service loop).

pub mod config;
pub mod encode;
pub mod filter;
pub mod merge;
pub mod nmea;
pub mod scheduler;
pub mod sixbit;
pub mod types;

// Re-export commonly used types at crate root
pub use encode::{encode_position_report, encode_static_voyage, EncoderConfig, SkipReason};
pub use filter::{EligibilityFilter, FilterStats};
pub use merge::{merge_snapshots, merge_sources};
pub use scheduler::{BroadcastScheduler, CyclePlan, SchedulerConfig, VesselOutcome};
pub use types::*;
