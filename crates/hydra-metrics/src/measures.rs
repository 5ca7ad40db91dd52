//! The fleet's measures.

use crate::{Measure, Unit};

pub const HEADS: Measure = Measure::new("heads", "Heads created by the fleet", Unit::Dimensionless);

pub const BOOTSTRAPPED_HEADS: Measure = Measure::new(
    "bootstrapped_heads",
    "Heads that finished bootstrapping",
    Unit::Dimensionless,
);

pub const CONNECTED_PEERS: Measure = Measure::new(
    "connected_peers",
    "Peers connected to a head",
    Unit::Dimensionless,
);

pub const UNIQUE_PEERS: Measure = Measure::new(
    "unique_peers",
    "Estimated distinct peers seen by any head",
    Unit::Dimensionless,
);

pub const ROUTING_TABLE_SIZE: Measure = Measure::new(
    "routing_table_size",
    "Entries across every head's routing table",
    Unit::Dimensionless,
);

pub const PROVIDER_RECORDS: Measure = Measure::new(
    "provider_records",
    "Provider records in the shared datastore",
    Unit::Dimensionless,
);

pub const FIND_PROVS: Measure = Measure::new(
    "find_provs",
    "Provider lookups by outcome",
    Unit::Dimensionless,
);

pub const FIND_PROVS_DURATION: Measure = Measure::new(
    "find_provs_duration",
    "Duration of upstream provider lookups",
    Unit::Seconds,
);

pub const FIND_PROVS_QUEUE_SIZE: Measure = Measure::new(
    "find_provs_queue_size",
    "Provider lookups waiting for a worker",
    Unit::Dimensionless,
);

pub const PREFETCHES_PENDING: Measure = Measure::new(
    "prefetches_pending",
    "Keys queued or in flight in the finder",
    Unit::Dimensionless,
);

pub const PREFETCH_NEGATIVE_CACHE_SIZE: Measure = Measure::new(
    "prefetch_negative_cache_size",
    "Keys in the finder's negative cache",
    Unit::Dimensionless,
);

pub const PREFETCH_NEGATIVE_CACHE_TTL: Measure = Measure::new(
    "prefetch_negative_cache_ttl",
    "Negative cache TTL",
    Unit::Seconds,
);

pub const PREFETCH_PENDING_LIMIT: Measure = Measure::new(
    "prefetch_pending_limit",
    "Capacity of the finder queue",
    Unit::Dimensionless,
);

pub const PROVIDER_CACHE_WRITE_ERRORS: Measure = Measure::new(
    "provider_cache_write_errors",
    "Failed writes of discovered providers into the cache",
    Unit::Dimensionless,
);

pub const CONNECTIONS: Measure = Measure::new(
    "connections",
    "Connections opened by heads",
    Unit::Dimensionless,
);

pub const DELEGATE_REQUESTS: Measure = Measure::new(
    "delegate_requests",
    "Requests sent to delegated routing services",
    Unit::Dimensionless,
);

pub const DELEGATE_LATENCY: Measure = Measure::new(
    "delegate_latency",
    "Latency of delegated routing requests",
    Unit::Milliseconds,
);

pub const DELEGATE_RESPONSE_BYTES: Measure = Measure::new(
    "delegate_response_bytes",
    "Body size of delegated routing responses",
    Unit::Bytes,
);
