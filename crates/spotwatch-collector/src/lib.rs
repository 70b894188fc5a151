//! spotwatch-collector — turns metadata lookups into gauge readings.
//!
//! Each scrape runs the same short pipeline against the metadata service
//! and returns a fresh set of readings; nothing is carried between scrapes.
//!
//! # Architecture
//!
//! ```text
//! TerminationCollector::collect()
//!   ├── token phase      (optional; failure aborts the scrape)
//!   ├── identity phase   (instance-id, instance-type; failure aborts)
//!   ├── termination phase (spot/instance-action → availability + notice)
//!   └── rebalance phase   (events/recommendations/rebalance → availability + notice)
//!
//! render()
//!   └── readings → Prometheus text exposition
//! ```

pub mod collector;
pub mod expose;
pub mod metrics;

pub use collector::{
    classify_response, CollectorConfig, EndpointState, RebalanceNotice, TerminationCollector,
    TerminationNotice,
};
pub use expose::render;
pub use metrics::{Descriptors, MetricDescriptor, Reading};
