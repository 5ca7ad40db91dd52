//! Aggregations and the default view set.

use crate::measures::*;
use crate::{Measure, TagKey};

/// Bucket boundaries for byte sizes.
pub const BYTES_BUCKETS: &[f64] = &[
    1024.0,
    2048.0,
    4096.0,
    16384.0,
    65536.0,
    262144.0,
    1048576.0,
    4194304.0,
    16777216.0,
    67108864.0,
    268435456.0,
    1073741824.0,
    4294967296.0,
];

/// Bucket boundaries for millisecond latencies.
pub const MILLISECONDS_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.3, 0.6, 0.8, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 13.0, 16.0, 20.0,
    25.0, 30.0, 40.0, 50.0, 65.0, 80.0, 100.0, 130.0, 160.0, 200.0, 250.0, 300.0, 400.0, 500.0,
    650.0, 800.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0, 50000.0, 100000.0,
];

/// Bucket boundaries for lookup durations in seconds.
pub const SECONDS_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 7.5, 10.0, 15.0, 20.0, 30.0, 60.0,
];

/// How recorded values are combined.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Sum,
    LastValue,
    Count,
    /// Histogram with explicit upper bounds; one overflow bucket follows.
    Distribution(Vec<f64>),
}

/// A measure aggregated over a set of tag keys.
#[derive(Debug, Clone)]
pub struct View {
    pub name: &'static str,
    pub measure: Measure,
    pub aggregation: Aggregation,
    pub tag_keys: Vec<TagKey>,
}

impl View {
    pub fn new(measure: Measure, aggregation: Aggregation, tag_keys: &[TagKey]) -> Self {
        Self {
            name: measure.name,
            measure,
            aggregation,
            tag_keys: tag_keys.to_vec(),
        }
    }
}

/// Views registered for the fleet.
pub fn default_views() -> Vec<View> {
    use Aggregation::*;
    use TagKey::*;

    vec![
        View::new(HEADS, Sum, &[]),
        View::new(BOOTSTRAPPED_HEADS, Sum, &[]),
        View::new(CONNECTED_PEERS, Sum, &[Name]),
        View::new(UNIQUE_PEERS, LastValue, &[]),
        View::new(ROUTING_TABLE_SIZE, LastValue, &[]),
        View::new(PROVIDER_RECORDS, LastValue, &[]),
        View::new(FIND_PROVS, Count, &[Status]),
        View::new(
            FIND_PROVS_DURATION,
            Distribution(SECONDS_BUCKETS.to_vec()),
            &[Status],
        ),
        View::new(FIND_PROVS_QUEUE_SIZE, Sum, &[]),
        View::new(PREFETCHES_PENDING, LastValue, &[]),
        View::new(PREFETCH_NEGATIVE_CACHE_SIZE, LastValue, &[]),
        View::new(PREFETCH_NEGATIVE_CACHE_TTL, LastValue, &[]),
        View::new(PREFETCH_PENDING_LIMIT, LastValue, &[]),
        View::new(PROVIDER_CACHE_WRITE_ERRORS, Count, &[]),
        View::new(CONNECTIONS, Count, &[Direction, UsesFd]),
        View::new(
            DELEGATE_REQUESTS,
            Count,
            &[Service, Operation, HttpCode, ErrorCode],
        ),
        View::new(
            DELEGATE_LATENCY,
            Distribution(MILLISECONDS_BUCKETS.to_vec()),
            &[Service, Operation],
        ),
        View::new(
            DELEGATE_RESPONSE_BYTES,
            Distribution(BYTES_BUCKETS.to_vec()),
            &[Service, Operation],
        ),
    ]
}
