//! In-process metrics for load runs.
//!
//! The engine only ever talks to a [`MetricsSink`]; [`Registry`] is the bundled
//! implementation that keeps every series in memory so a run can be summarized (or
//! asserted on in tests) once it finishes.

pub mod key;
pub mod metrics;
pub mod registry;
pub mod sink;
pub mod tags;

pub use key::KeyId;
pub use metrics::{HistogramSummary, MetricHandle, MetricKind, MetricSeriesSummary, MetricValue};
pub use registry::{MetricId, Registry};
pub use sink::{Labels, Metric, MetricsSink, NoopSink};
pub use tags::TagSet;
