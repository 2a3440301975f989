//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub inboxes (personal and shared)
//! - Metrics (Prometheus) and health

mod inbox;
pub mod metrics;

pub use inbox::inbox_router;
pub use metrics::ops_router;
