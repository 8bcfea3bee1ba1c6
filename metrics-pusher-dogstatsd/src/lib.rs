//! Periodically pushes named counters and gauges to a [DogStatsD][dsd]-compatible server over UDP.
//!
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_pusher_dogstatsd::DogStatsDPusherBuilder;
//! // First, create a builder and point it at one or more destinations.
//! //
//! // A destination is `host:port`, optionally followed by a metric name prefix (`,myinstance`) and/or a block of static
//! // tags (`|#env:staging,svc:api`).
//! let builder = DogStatsDPusherBuilder::default().with_destination("127.0.0.1:8125,myinstance|#env:staging");
//!
//! // Most users will want to "install" the pusher, which installs a registry as the global recorder for all `metrics`
//! // calls, and creates a background thread that pushes the registry on an interval.
//! let _registry = builder.install().expect("failed to install pusher");
//!
//! metrics::counter!("worker.1.requests").increment(1);
//!
//! // For hosts that already have their own timer, `build_pusher` returns a `Pusher` to be driven manually:
//! # use metrics_pusher_dogstatsd::{MetricKind, MetricRegistry};
//! let registry = MetricRegistry::new();
//! registry.register("core.busy_workers", MetricKind::Gauge).set(3);
//!
//! let mut pusher = DogStatsDPusherBuilder::default().build_pusher().expect("failed to build pusher");
//! pusher.push(&registry);
//! ```
//!
//! # Tags from metric names
//!
//! Every numeric segment of a dotted metric name is turned into a tag, keyed by the closest non-numeric segment before
//! it, and removed from the name. With the default prefix of `uwsgi`, the metric `worker.1.requests` is sent as:
//!
//! ```text
//! uwsgi.worker.requests:42|c|#worker:1
//! ```
//!
//! Static tags, from the destination string or from [`DogStatsDPusherBuilder::with_extra_tags`], are added after the
//! tags taken from the name.
//!
//! # Delivery
//!
//! Each metric is sent as its own datagram on a non-blocking socket. Sends are never retried: a metric that can't be
//! sent is simply dropped until the next push. Likewise, a metric that can't be turned into a packet (because its name
//! is too long, or it has an out-of-range numeric segment) is skipped without affecting the rest of the push.
//!
//! # Missing
//!
//! ## IPv6 destinations
//!
//! Destinations are always resolved to an IPv4 address.
//!
//! ## Histograms
//!
//! Only counters and gauges are pushed. Histograms recorded through `metrics` are discarded.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, DogStatsDPusherBuilder};

mod destination;
pub use self::destination::{DestinationError, DestinationSpec, DEFAULT_PREFIX, MAX_INLINE_TAGS};

mod forwarder;

mod pusher;
pub use self::pusher::Pusher;

mod recorder;
pub use self::recorder::PushRecorder;

mod registry;
pub use self::registry::{MetricHandle, MetricKind, MetricRecord, MetricRegistry, MetricSource};

mod tags;
pub use self::tags::{extract_tags, DerivedTag, ExtractError, ExtractedName};

mod telemetry;
mod transport;

mod writer;
pub use self::writer::WriteError;
