//! Event handlers
//!
//! One handler per inbound event family. Each decodes the event, writes
//! through the store and records the event in the sync log.

pub mod header;
pub mod log;
pub mod masterdata;
pub mod reconcile;
pub mod tracking;

pub use header::{HeaderOutcome, HeaderSync, MATERIAL, STYLE};
pub use masterdata::{MasterdataReport, MasterdataSync};
pub use tracking::{TrackingOutcome, TrackingSync};
