//! Exporter turning SDK collections into view rows.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use parking_lot::Mutex;

use crate::recorder::{AggregationData, ViewData};
use crate::{TagKey, TagSet};

/// Keeps the rows of the most recent collection.
///
/// Rows are ordered by the position of their view in `views`, then by tags.
#[derive(Clone)]
pub(crate) struct SnapshotExporter {
    views: Arc<[&'static str]>,
    latest: Arc<Mutex<Vec<ViewData>>>,
}

impl SnapshotExporter {
    pub(crate) fn new(views: Vec<&'static str>) -> Self {
        Self {
            views: views.into(),
            latest: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn latest(&self) -> Vec<ViewData> {
        self.latest.lock().clone()
    }

    fn rows(&self, metrics: &ResourceMetrics) -> Vec<ViewData> {
        let mut rows: Vec<(usize, TagSet, AggregationData)> = Vec::new();
        for scope in metrics.scope_metrics() {
            for metric in scope.metrics() {
                let Some(idx) = self.views.iter().position(|v| *v == metric.name()) else {
                    continue;
                };
                match metric.data() {
                    AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                        for point in sum.data_points() {
                            rows.push((
                                idx,
                                tag_set(point.attributes()),
                                AggregationData::Count {
                                    count: point.value(),
                                },
                            ));
                        }
                    }
                    AggregatedMetrics::F64(MetricData::Sum(sum)) => {
                        for point in sum.data_points() {
                            rows.push((
                                idx,
                                tag_set(point.attributes()),
                                AggregationData::Sum {
                                    value: point.value(),
                                },
                            ));
                        }
                    }
                    AggregatedMetrics::F64(MetricData::Gauge(gauge)) => {
                        for point in gauge.data_points() {
                            rows.push((
                                idx,
                                tag_set(point.attributes()),
                                AggregationData::LastValue {
                                    value: point.value(),
                                },
                            ));
                        }
                    }
                    AggregatedMetrics::F64(MetricData::Histogram(histogram)) => {
                        for point in histogram.data_points() {
                            rows.push((
                                idx,
                                tag_set(point.attributes()),
                                AggregationData::Distribution {
                                    count: point.count(),
                                    sum: point.sum(),
                                    buckets: point.bucket_counts().collect(),
                                },
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        rows.into_iter()
            .map(|(idx, tags, data)| ViewData {
                view: self.views[idx],
                tags,
                data,
            })
            .collect()
    }
}

impl PushMetricExporter for SnapshotExporter {
    async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        let rows = self.rows(metrics);
        *self.latest.lock() = rows;
        Ok(())
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        Temporality::Cumulative
    }
}

fn tag_set<'a>(attributes: impl Iterator<Item = &'a KeyValue>) -> TagSet {
    attributes.fold(TagSet::new(), |tags, kv| match TagKey::from_name(kv.key.as_str()) {
        Some(key) => tags.with(key, kv.value.as_str().into_owned()),
        None => tags,
    })
}
