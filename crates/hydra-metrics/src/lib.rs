//! Hydra Metrics
//!
//! Dimensional metrics on top of the OpenTelemetry SDK.
//!
//! - A [`Measure`] names a quantity and its [`Unit`].
//! - A [`View`] aggregates one measure over a chosen set of [`TagKey`]s with
//!   an [`Aggregation`]. Each view is backed by one instrument: a counter,
//!   an up-down counter, a gauge or an explicit-bucket histogram.
//! - [`Metrics`] is a cheap, cloneable handle owning its meter provider.
//!   Components receive it explicitly and call [`Metrics::record`].
//! - A [`Reporter`] is handed periodic snapshots of every view.
//!
//! The fleet's measures and default views live in [`measures`] and
//! [`views`]. [`HyperLogLog`] estimates distinct counts such as unique
//! remote peers.

mod exporter;
mod hll;
pub mod measures;
mod recorder;
mod reporter;
mod tags;
pub mod views;

pub use hll::HyperLogLog;
pub use recorder::{AggregationData, Metrics, ViewData};
pub use reporter::{spawn_reporting, LogReporter, Reporter};
pub use tags::{Status, TagKey, TagSet};
pub use views::{Aggregation, View};

/// Dimensional unit of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Dimensionless,
    Bytes,
    Seconds,
    Milliseconds,
}

impl Unit {
    /// Short unit symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Dimensionless => "1",
            Unit::Bytes => "By",
            Unit::Seconds => "s",
            Unit::Milliseconds => "ms",
        }
    }
}

/// A named quantity that can be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Measure {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: Unit,
}

impl Measure {
    /// Declare a measure.
    pub const fn new(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            description,
            unit,
        }
    }
}
