use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::{
    destination::Destination,
    registry::{MetricKind, MetricRecord, MetricSource},
    tags::{extract_tags, ExtractError},
    telemetry::{Telemetry, TelemetryUpdate},
    writer::{Metric, MetricType, PacketWriter, WriteError},
};

const WORKER_METRIC_PREFIX: &str = "worker.";

/// Pusher configuration.
pub(crate) struct PushConfiguration {
    /// Only push metrics whose name starts with `worker.`.
    pub no_workers: bool,

    /// Push every metric as a gauge, regardless of its kind.
    pub all_gauges: bool,

    /// Static tags added after the inline tags of every destination.
    pub extra_tags: Vec<String>,

    /// When set, only metrics whose clean name is listed are pushed, and they are pushed without a prefix.
    pub allowed_metrics: Option<HashSet<String>>,

    /// Maximum length of a single packet.
    pub max_payload_len: usize,

    /// Whether or not to record internal telemetry.
    pub telemetry: bool,
}

/// Errors that cause a single record to be dropped from a push.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RecordError {
    #[error("metric name is {len} bytes long, which is over the limit of {max_len} bytes")]
    NameTooLong { len: usize, max_len: usize },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

enum DestinationState {
    // Not yet configured: holds the destination string until the first push.
    Pending(String),

    // Configuration failed. Pushes to this destination are no-ops.
    Failed,

    Configured { spec: String, destination: Destination },
}

impl DestinationState {
    fn ensure_configured(&mut self, extra_tags: &[String]) -> Option<(&str, &Destination)> {
        if let DestinationState::Pending(spec) = self {
            let spec = std::mem::take(spec);
            *self = match Destination::configure(&spec, extra_tags) {
                Ok(destination) => {
                    debug!(
                        destination = %spec,
                        remote_addr = %destination.transport().remote_addr(),
                        prefix = destination.prefix(),
                        "Configured DogStatsD destination."
                    );
                    DestinationState::Configured { spec, destination }
                }
                Err(e) => {
                    error!(destination = %spec, error = %e, "Failed to configure DogStatsD destination.");
                    DestinationState::Failed
                }
            };
        }

        match &*self {
            DestinationState::Configured { spec, destination } => Some((spec.as_str(), destination)),
            DestinationState::Pending(_) | DestinationState::Failed => None,
        }
    }
}

/// Pushes metrics to one or more DogStatsD destinations.
///
/// Each call to [`push`][Pusher::push] walks the given [`MetricSource`] in order and sends one datagram per metric to
/// every destination. Destinations are configured on the first push, and a destination that fails to configure is
/// skipped from then on.
///
/// A push never fails as a whole: a metric that can't be turned into a packet is dropped for that push, and a packet
/// that can't be sent is dropped without retrying.
pub struct Pusher {
    config: PushConfiguration,
    destinations: Vec<DestinationState>,
    telemetry: Option<Telemetry>,
}

impl Pusher {
    pub(crate) fn new(config: PushConfiguration, destinations: Vec<String>) -> Self {
        Pusher {
            config,
            destinations: destinations.into_iter().map(DestinationState::Pending).collect(),
            telemetry: None,
        }
    }

    fn update_telemetry(&mut self, update: &TelemetryUpdate) {
        // Our telemetry metrics are registered lazily so that they go through whichever global recorder has been
        // installed by the time we've actually pushed something.
        if self.config.telemetry && update.had_updates() {
            self.telemetry.get_or_insert_with(Telemetry::new).apply_update(update);
        }
    }

    /// Pushes every metric in `source` to every destination.
    ///
    /// Each metric is read once per push and sent to every destination before it is reset, so that metrics which
    /// reset after being pushed report the same value everywhere.
    pub fn push<S>(&mut self, source: &S)
    where
        S: MetricSource + ?Sized,
    {
        let mut telemetry_update = TelemetryUpdate::default();

        let mut destinations = Vec::with_capacity(self.destinations.len());
        for state in &mut self.destinations {
            let Some((spec, destination)) = state.ensure_configured(&self.config.extra_tags) else {
                continue;
            };

            if source.is_empty() {
                warn!(destination = spec, "DogStatsD pusher configured but there are no metrics to push.");
                continue;
            }

            destinations.push(destination);
        }

        if !destinations.is_empty() {
            push_records(&self.config, &destinations, source, &mut telemetry_update);
        }

        debug!(
            records_pushed = telemetry_update.records_pushed(),
            records_dropped = telemetry_update.records_dropped(),
            records_filtered = telemetry_update.records_filtered(),
            packets_sent = telemetry_update.packets_sent(),
            packets_dropped = telemetry_update.packets_dropped(),
            "Finished pushing metrics."
        );

        self.update_telemetry(&telemetry_update);
    }
}

fn push_records<S>(
    config: &PushConfiguration,
    destinations: &[&Destination],
    source: &S,
    telemetry: &mut TelemetryUpdate,
) where
    S: MetricSource + ?Sized,
{
    // One buffer per destination, reused for every packet in this push.
    let mut writers = destinations.iter().map(|_| PacketWriter::new(config.max_payload_len)).collect::<Vec<_>>();

    for index in 0..source.len() {
        let Some(record) = source.read(index) else {
            continue;
        };

        if config.no_workers && !record.name.starts_with(WORKER_METRIC_PREFIX) {
            trace!(metric_name = record.name.as_str(), "Skipping non-worker metric.");
            telemetry.track_record_filtered();
            continue;
        }

        for (destination, writer) in destinations.iter().zip(&mut writers) {
            push_record(config, destination, &record, writer, telemetry);
        }

        if record.reset_after_push {
            source.reset(index);
        }
    }
}

fn push_record(
    config: &PushConfiguration,
    destination: &Destination,
    record: &MetricRecord,
    writer: &mut PacketWriter,
    telemetry: &mut TelemetryUpdate,
) {
    match build_packet(config, destination, record, writer) {
        Ok(Some(packet)) => match destination.transport().send(packet) {
            Ok(_) => telemetry.track_packet_send_succeeded(packet.len()),
            Err(e) => {
                error!(metric_name = record.name.as_str(), error = %e, "Failed to send packet.");
                telemetry.track_packet_send_failed(packet.len());
            }
        },
        Ok(None) => {
            trace!(metric_name = record.name.as_str(), "Skipping metric not in the allow-list.");
            telemetry.track_record_filtered();
        }
        Err(e) => {
            debug!(metric_name = record.name.as_str(), error = %e, "Dropping metric.");
            telemetry.track_record_dropped();
        }
    }
}

/// Builds the packet for a single record.
///
/// Returns `Ok(None)` if the record is not in the allow-list.
fn build_packet<'w>(
    config: &PushConfiguration,
    destination: &Destination,
    record: &MetricRecord,
    writer: &'w mut PacketWriter,
) -> Result<Option<&'w [u8]>, RecordError> {
    let max_len = writer.max_payload_len();
    if record.name.len() >= max_len {
        return Err(RecordError::NameTooLong { len: record.name.len(), max_len });
    }

    let extracted = extract_tags(&record.name)?;

    // Allow-listed metrics are matched on their clean name, and are sent as-is, without a prefix.
    let prefix = match &config.allowed_metrics {
        Some(allowed) if !allowed.contains(&extracted.name()) => return Ok(None),
        Some(_) => None,
        None => Some(destination.prefix()),
    };

    let metric_type = if config.all_gauges || record.kind == MetricKind::Gauge {
        MetricType::Gauge
    } else {
        MetricType::Counter
    };

    let metric = Metric { extracted: &extracted, value: record.value, metric_type };
    let packet = writer.write_metric(prefix, &metric, destination.static_tags())?;
    Ok(Some(packet))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, net::UdpSocket, time::Duration};

    use super::{build_packet, push_records, PushConfiguration, Pusher, RecordError};
    use crate::{
        destination::Destination,
        recorder::PushRecorder,
        registry::{MetricKind, MetricRecord, MetricRegistry, MetricSource as _},
        tags::ExtractError,
        telemetry::TelemetryUpdate,
        writer::PacketWriter,
    };

    fn config() -> PushConfiguration {
        PushConfiguration {
            no_workers: false,
            all_gauges: false,
            extra_tags: Vec::new(),
            allowed_metrics: None,
            max_payload_len: 8192,
            telemetry: false,
        }
    }

    fn record(name: &str, value: i64, kind: MetricKind) -> MetricRecord {
        MetricRecord { name: name.to_string(), value, kind, reset_after_push: false, initial_value: 0 }
    }

    fn packet_string(
        config: &PushConfiguration,
        destination: &Destination,
        record: &MetricRecord,
    ) -> Result<Option<String>, RecordError> {
        let mut writer = PacketWriter::new(config.max_payload_len);
        build_packet(config, destination, record, &mut writer)
            .map(|maybe_packet| maybe_packet.map(|packet| String::from_utf8(packet.to_vec()).unwrap()))
    }

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        socket
    }

    fn recv_string(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 8192];
        let n = socket.recv(&mut buf).unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[test]
    fn packets() {
        let destination = Destination::configure("127.0.0.1:8125,myinstance|#env:staging", &[]).unwrap();
        let config = config();

        let cases = [
            (record("core.requests", 7, MetricKind::Counter), "myinstance.core.requests:7|c|#env:staging"),
            (
                record("worker.3.busy", 1, MetricKind::Gauge),
                "myinstance.worker.busy:1|g|#worker:3,env:staging",
            ),
        ];

        for (record, expected) in cases {
            let actual = packet_string(&config, &destination, &record).unwrap();
            assert_eq!(actual.as_deref(), Some(expected));
        }
    }

    #[test]
    fn all_gauges() {
        let destination = Destination::configure("127.0.0.1:8125", &[]).unwrap();
        let config = PushConfiguration { all_gauges: true, ..config() };

        let actual = packet_string(&config, &destination, &record("core.requests", 7, MetricKind::Counter));
        assert_eq!(actual.unwrap().as_deref(), Some("uwsgi.core.requests:7|g"));
    }

    #[test]
    fn allow_list() {
        let destination = Destination::configure("127.0.0.1:8125", &[]).unwrap();
        let allowed = ["worker.requests".to_string()].into_iter().collect::<HashSet<_>>();
        let config = PushConfiguration { allowed_metrics: Some(allowed), ..config() };

        let actual = packet_string(&config, &destination, &record("worker.2.requests", 9, MetricKind::Counter));
        assert_eq!(actual.unwrap().as_deref(), Some("worker.requests:9|c|#worker:2"));

        let actual = packet_string(&config, &destination, &record("core.requests", 9, MetricKind::Counter));
        assert_eq!(actual.unwrap(), None);
    }

    #[test]
    fn record_errors() {
        let destination = Destination::configure("127.0.0.1:8125", &[]).unwrap();
        let config = PushConfiguration { max_payload_len: 32, ..config() };

        let long_name = "a".repeat(32);
        let actual = packet_string(&config, &destination, &record(&long_name, 1, MetricKind::Counter));
        assert_eq!(actual, Err(RecordError::NameTooLong { len: 32, max_len: 32 }));

        let actual = packet_string(&config, &destination, &record("...", 1, MetricKind::Counter));
        assert_eq!(actual, Err(RecordError::Extract(ExtractError::NoSegments)));

        let actual =
            packet_string(&config, &destination, &record("foo.99999999999999999999", 1, MetricKind::Counter));
        assert!(matches!(actual, Err(RecordError::Extract(ExtractError::OutOfRange { .. }))));

        // Short enough to be accepted as a name, too long once prefixed.
        let actual = packet_string(&config, &destination, &record(&"b".repeat(28), 1, MetricKind::Counter));
        assert!(matches!(actual, Err(RecordError::Write(_))));
    }

    #[test]
    fn push_sends_in_order_and_skips_bad_records() {
        let receiver = receiver();
        let spec = format!("{},app", receiver.local_addr().unwrap());

        let registry = MetricRegistry::new();
        registry.register("core.requests", MetricKind::Counter).increment(3);
        registry.register("foo.99999999999999999999", MetricKind::Counter);
        registry.register("worker.1.requests", MetricKind::Counter).increment(4);
        registry.register_with("worker.1.exceptions", MetricKind::Counter, 2, true).increment(5);

        let mut pusher = Pusher::new(config(), vec![spec]);
        pusher.push(&registry);

        assert_eq!(recv_string(&receiver), "app.core.requests:3|c");
        assert_eq!(recv_string(&receiver), "app.worker.requests:4|c|#worker:1");
        assert_eq!(recv_string(&receiver), "app.worker.exceptions:7|c|#worker:1");

        // The reset-after-push metric is back to its initial value; the others are left alone.
        assert_eq!(registry.read(3).unwrap().value, 2);
        assert_eq!(registry.read(0).unwrap().value, 3);
    }

    #[test]
    fn push_no_workers() {
        let receiver = receiver();
        let spec = receiver.local_addr().unwrap().to_string();

        let registry = MetricRegistry::new();
        registry.register("core.requests", MetricKind::Counter).increment(3);
        registry.register("worker.1.requests", MetricKind::Counter).increment(4);

        let mut pusher = Pusher::new(PushConfiguration { no_workers: true, ..config() }, vec![spec]);
        pusher.push(&registry);

        assert_eq!(recv_string(&receiver), "uwsgi.worker.requests:4|c|#worker:1");
    }

    #[test]
    fn unconfigurable_destination_is_skipped() {
        let receiver = receiver();
        let good = receiver.local_addr().unwrap().to_string();

        let registry = MetricRegistry::new();
        registry.register("core.requests", MetricKind::Counter).increment(1);

        let mut pusher = Pusher::new(config(), vec!["no-port-here".to_string(), good]);
        pusher.push(&registry);
        pusher.push(&registry);

        assert_eq!(recv_string(&receiver), "uwsgi.core.requests:1|c");
        assert_eq!(recv_string(&receiver), "uwsgi.core.requests:1|c");
    }

    #[test]
    fn push_with_no_metrics_is_a_no_op() {
        let receiver = receiver();
        receiver.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let spec = receiver.local_addr().unwrap().to_string();

        let registry = MetricRegistry::new();
        let mut pusher = Pusher::new(config(), vec![spec]);
        pusher.push(&registry);

        let mut buf = [0u8; 64];
        assert!(receiver.recv(&mut buf).is_err());
    }

    #[test]
    fn reset_after_push_reaches_every_destination() {
        let first = receiver();
        let second = receiver();
        let destinations =
            vec![first.local_addr().unwrap().to_string(), second.local_addr().unwrap().to_string()];

        let registry = MetricRegistry::new();
        registry.register_with("core.requests", MetricKind::Counter, 0, true).increment(7);

        let mut pusher = Pusher::new(config(), destinations);
        pusher.push(&registry);

        assert_eq!(recv_string(&first), "uwsgi.core.requests:7|c");
        assert_eq!(recv_string(&second), "uwsgi.core.requests:7|c");
        assert_eq!(registry.read(0).unwrap().value, 0);
    }

    #[test]
    fn failed_send_is_dropped_and_push_continues() {
        let receiver = receiver();
        let destination = Destination::configure(&receiver.local_addr().unwrap().to_string(), &[]).unwrap();

        // Big enough to pass our own limit, too big for a single UDP datagram.
        let config = PushConfiguration { max_payload_len: 100_000, ..config() };

        let registry = MetricRegistry::new();
        registry.register(&"a".repeat(66_000), MetricKind::Counter).increment(1);
        registry.register("core.requests", MetricKind::Counter).increment(2);

        let mut update = TelemetryUpdate::default();
        push_records(&config, &[&destination], &registry, &mut update);

        assert_eq!(recv_string(&receiver), "uwsgi.core.requests:2|c");
        assert_eq!(update.packets_dropped(), 1);
        assert_eq!(update.packets_sent(), 1);
        assert_eq!(update.records_dropped(), 1);
    }

    #[test]
    fn telemetry_is_registered_once_there_is_work() {
        let receiver = receiver();
        let telemetry_registry = MetricRegistry::new();
        let recorder = PushRecorder::new(telemetry_registry.clone());

        let config = PushConfiguration { telemetry: true, ..config() };
        let mut pusher = Pusher::new(config, vec![receiver.local_addr().unwrap().to_string()]);

        let empty = MetricRegistry::new();
        metrics::with_local_recorder(&recorder, || pusher.push(&empty));
        assert!(telemetry_registry.is_empty());

        let registry = MetricRegistry::new();
        registry.register("core.requests", MetricKind::Counter).increment(1);
        metrics::with_local_recorder(&recorder, || pusher.push(&registry));
        assert_eq!(recv_string(&receiver), "uwsgi.core.requests:1|c");

        let value_of = |name: &str| telemetry_registry.get(name).map(|handle| handle.value());
        assert_eq!(value_of("dogstatsd.pusher.records_pushed"), Some(1));
        assert_eq!(value_of("dogstatsd.pusher.packets_sent"), Some(1));
        assert_eq!(value_of("dogstatsd.pusher.packets_dropped"), Some(0));
    }
}
