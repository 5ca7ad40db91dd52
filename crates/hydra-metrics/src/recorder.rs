//! Recording measurements through OpenTelemetry instruments.
//!
//! Each [`View`] becomes one instrument named after the view. Tags are
//! projected onto the view's keys before they become attributes, so the SDK
//! aggregates one row per distinct projected tag set.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, MeterProvider as _, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use serde::Serialize;
use tracing::debug;

use crate::exporter::SnapshotExporter;
use crate::views::default_views;
use crate::{Aggregation, Measure, TagSet, View};

/// Collections are pulled by [`Metrics::snapshot`]; the periodic export is
/// only a backstop.
const EXPORT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Aggregated value of one view row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationData {
    Sum { value: f64 },
    LastValue { value: f64 },
    Count { count: u64 },
    Distribution {
        count: u64,
        sum: f64,
        /// One counter per bound plus the overflow bucket.
        buckets: Vec<u64>,
    },
}

impl AggregationData {
    /// Single scalar: the value, the count, or the number of samples.
    pub fn scalar(&self) -> f64 {
        match self {
            AggregationData::Sum { value } | AggregationData::LastValue { value } => *value,
            AggregationData::Count { count } | AggregationData::Distribution { count, .. } => {
                *count as f64
            }
        }
    }
}

/// One row of a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ViewData {
    pub view: &'static str,
    pub tags: TagSet,
    pub data: AggregationData,
}

enum Instrument {
    Count(Counter<u64>),
    Sum(UpDownCounter<f64>),
    LastValue(Gauge<f64>),
    Distribution(Histogram<f64>),
}

impl Instrument {
    fn build(meter: &Meter, view: &View) -> Self {
        let name = view.name;
        let description = view.measure.description;
        let unit = view.measure.unit.symbol();
        match &view.aggregation {
            Aggregation::Count => Instrument::Count(
                meter
                    .u64_counter(name)
                    .with_description(description)
                    .with_unit(unit)
                    .build(),
            ),
            Aggregation::Sum => Instrument::Sum(
                meter
                    .f64_up_down_counter(name)
                    .with_description(description)
                    .with_unit(unit)
                    .build(),
            ),
            Aggregation::LastValue => Instrument::LastValue(
                meter
                    .f64_gauge(name)
                    .with_description(description)
                    .with_unit(unit)
                    .build(),
            ),
            Aggregation::Distribution(bounds) => Instrument::Distribution(
                meter
                    .f64_histogram(name)
                    .with_description(description)
                    .with_unit(unit)
                    .with_boundaries(bounds.clone())
                    .build(),
            ),
        }
    }

    fn record(&self, value: f64, attributes: &[KeyValue]) {
        match self {
            Instrument::Count(counter) => counter.add(1, attributes),
            Instrument::Sum(counter) => counter.add(value, attributes),
            Instrument::LastValue(gauge) => gauge.record(value, attributes),
            Instrument::Distribution(histogram) => histogram.record(value, attributes),
        }
    }
}

struct Recorder {
    views: Vec<View>,
    instruments: Vec<Instrument>,
    provider: SdkMeterProvider,
    exporter: SnapshotExporter,
}

/// Handle for recording measurements.
///
/// Clones share the same meter provider.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Recorder>,
}

impl Metrics {
    /// Create a handle with one instrument per view.
    pub fn new(views: Vec<View>) -> Self {
        let exporter = SnapshotExporter::new(views.iter().map(|v| v.name).collect());
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(EXPORT_INTERVAL)
            .build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = provider.meter("hydra");
        let instruments = views.iter().map(|view| Instrument::build(&meter, view)).collect();
        Self {
            inner: Arc::new(Recorder {
                views,
                instruments,
                provider,
                exporter,
            }),
        }
    }

    /// Create a handle with the fleet's views.
    pub fn with_default_views() -> Self {
        Self::new(default_views())
    }

    /// Record a value for every view of `measure`. Values for measures
    /// without a view are dropped.
    pub fn record(&self, measure: &Measure, value: f64, tags: &TagSet) {
        for (view, instrument) in self.inner.views.iter().zip(&self.inner.instruments) {
            if view.measure.name != measure.name {
                continue;
            }
            let attributes: Vec<KeyValue> = tags
                .project(&view.tag_keys)
                .iter()
                .map(|(key, value)| KeyValue::new(key.as_str(), value.to_string()))
                .collect();
            instrument.record(value, &attributes);
        }
    }

    /// Record `1`.
    pub fn increment(&self, measure: &Measure, tags: &TagSet) {
        self.record(measure, 1.0, tags);
    }

    /// Scalar value of a view row, if anything was recorded for it.
    pub fn value(&self, view: &str, tags: &TagSet) -> Option<f64> {
        self.data(view, tags).map(|d| d.scalar())
    }

    /// Aggregate of a view row.
    pub fn data(&self, view: &str, tags: &TagSet) -> Option<AggregationData> {
        let keys = &self.inner.views.iter().find(|v| v.name == view)?.tag_keys;
        let tags = tags.project(keys);
        self.snapshot()
            .into_iter()
            .find(|row| row.view == view && row.tags == tags)
            .map(|row| row.data)
    }

    /// Every recorded row, ordered by view registration then tags.
    pub fn snapshot(&self) -> Vec<ViewData> {
        if let Err(e) = self.inner.provider.force_flush() {
            debug!(error = %e, "metrics collection failed");
        }
        self.inner.exporter.latest()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("views", &self.inner.views.len())
            .finish()
    }
}
