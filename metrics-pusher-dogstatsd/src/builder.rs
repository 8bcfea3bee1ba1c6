use std::{collections::HashSet, time::Duration};

use thiserror::Error;

use crate::{
    forwarder::Forwarder,
    pusher::{PushConfiguration, Pusher},
    recorder::PushRecorder,
    registry::MetricRegistry,
    writer::SMALLEST_VALID_PAYLOAD,
};

const DEFAULT_DESTINATION: &str = "127.0.0.1:8125";
const DEFAULT_MAX_PAYLOAD_LEN: usize = 8192;
const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Errors that could occur while building or installing a DogStatsD pusher.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The maximum payload length is too small to hold any packet.
    #[error("maximum payload length must be at least {min} bytes (got {len})")]
    InvalidPayloadLength {
        /// The configured length.
        len: usize,
        /// The smallest allowed length.
        min: usize,
    },

    /// Failed to spawn the background thread.
    #[error("failed to spawn background thread for pusher")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install pusher as global recorder")]
    FailedToInstall,
}

/// Builder for a DogStatsD pusher.
pub struct DogStatsDPusherBuilder {
    destinations: Vec<String>,
    push_interval: Duration,
    max_payload_len: usize,
    no_workers: bool,
    all_gauges: bool,
    extra_tags: Vec<String>,
    allowed_metrics: HashSet<String>,
    telemetry: bool,
}

impl DogStatsDPusherBuilder {
    /// Adds a destination to push metrics to.
    ///
    /// Destinations take the form `host:port[,prefix][|#tag1,tag2,...]`, such as `127.0.0.1:8125,myinstance` or
    /// `127.0.0.1:8125|#env:staging,svc:api`. When no prefix is given, metric names are prefixed with `uwsgi`.
    ///
    /// Destinations are parsed and resolved on the first push. A destination that fails to parse, resolve, or open its
    /// socket is logged once and then skipped.
    ///
    /// Can be called multiple times to push to several destinations. Defaults to `127.0.0.1:8125` if never called.
    #[must_use]
    pub fn with_destination<D>(mut self, destination: D) -> Self
    where
        D: Into<String>,
    {
        self.destinations.push(destination.into());
        self
    }

    /// Set the interval between pushes when running in the background.
    ///
    /// Defaults to 3 seconds.
    #[must_use]
    pub fn with_push_interval(mut self, push_interval: Duration) -> Self {
        self.push_interval = push_interval;
        self
    }

    /// Set the maximum payload length.
    ///
    /// Every metric is sent as a single datagram. A metric whose packet would be larger than this is dropped, as is a
    /// metric whose name alone is this long or longer.
    ///
    /// Defaults to 8192 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Sets whether or not to push only per-worker metrics.
    ///
    /// When enabled, only metrics whose name starts with `worker.` are pushed.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_no_workers(mut self, no_workers: bool) -> Self {
        self.no_workers = no_workers;
        self
    }

    /// Sets whether or not to push every metric as a gauge.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_all_gauges(mut self, all_gauges: bool) -> Self {
        self.all_gauges = all_gauges;
        self
    }

    /// Adds extra static tags to every metric, given as a comma-separated list such as `foo:bar,qin,baz:qux`.
    ///
    /// Extra tags are added after any tags from the destination string.
    #[must_use]
    pub fn with_extra_tags(mut self, tags: &str) -> Self {
        self.extra_tags.extend(tags.split(',').filter(|tag| !tag.is_empty()).map(str::to_string));
        self
    }

    /// Adds a single extra static tag to every metric, either `key:value` or a bare tag.
    ///
    /// An empty tag is ignored.
    #[must_use]
    pub fn with_extra_tag<T>(mut self, tag: T) -> Self
    where
        T: Into<String>,
    {
        let tag = tag.into();
        if !tag.is_empty() {
            self.extra_tags.push(tag);
        }
        self
    }

    /// Adds a metric to the allow-list.
    ///
    /// Once any metric is allow-listed, only allow-listed metrics are pushed, and they are pushed without a prefix.
    /// Metrics are matched on their name after numeric segments have been turned into tags, so allow-listing
    /// `worker.requests` allows `worker.1.requests`, `worker.2.requests`, and so on.
    #[must_use]
    pub fn with_allowed_metric<N>(mut self, name: N) -> Self
    where
        N: Into<String>,
    {
        self.allowed_metrics.insert(name.into());
        self
    }

    /// Sets whether or not to enable telemetry for the pusher.
    ///
    /// When enabled, counters under the `dogstatsd.pusher.` namespace track how many metrics were pushed, dropped, or
    /// filtered, and how many packets and bytes were sent or dropped. They are recorded through the global recorder.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the pusher.
    ///
    /// The pusher must be driven by the caller, by calling [`Pusher::push`] on their own schedule.
    ///
    /// # Errors
    ///
    /// If the maximum payload length is too small to hold any packet, an error will be returned.
    pub fn build_pusher(self) -> Result<Pusher, BuildError> {
        if self.max_payload_len < SMALLEST_VALID_PAYLOAD.len() {
            return Err(BuildError::InvalidPayloadLength {
                len: self.max_payload_len,
                min: SMALLEST_VALID_PAYLOAD.len(),
            });
        }

        let config = PushConfiguration {
            no_workers: self.no_workers,
            all_gauges: self.all_gauges,
            extra_tags: self.extra_tags,
            allowed_metrics: if self.allowed_metrics.is_empty() {
                None
            } else {
                Some(self.allowed_metrics)
            },
            max_payload_len: self.max_payload_len,
            telemetry: self.telemetry,
        };

        let destinations = if self.destinations.is_empty() {
            vec![DEFAULT_DESTINATION.to_string()]
        } else {
            self.destinations
        };

        Ok(Pusher::new(config, destinations))
    }

    /// Builds the pusher and spawns a background thread to push `registry` at the configured interval.
    ///
    /// # Errors
    ///
    /// If the maximum payload length is invalid, or if the background thread cannot be spawned, an error will be
    /// returned.
    pub fn spawn(self, registry: MetricRegistry) -> Result<(), BuildError> {
        let push_interval = self.push_interval;
        let pusher = self.build_pusher()?;
        spawn_forwarder(Forwarder::new(pusher, registry, push_interval))
    }

    /// Builds and installs the pusher.
    ///
    /// A new registry is created and installed as the global recorder, so that `metrics` macros such as `counter!` and
    /// `gauge!` register into it, and a background thread is spawned to push it at the configured interval. The
    /// registry is returned so that the caller can register metrics with explicit initial values or reset behavior.
    ///
    /// # Errors
    ///
    /// If the maximum payload length is invalid, if the background thread cannot be spawned, or if a global recorder is
    /// already installed, an error will be returned.
    pub fn install(self) -> Result<MetricRegistry, BuildError> {
        let push_interval = self.push_interval;
        let pusher = self.build_pusher()?;

        let registry = MetricRegistry::new();
        let recorder = PushRecorder::new(registry.clone());
        metrics::set_global_recorder(recorder).map_err(|_| BuildError::FailedToInstall)?;

        spawn_forwarder(Forwarder::new(pusher, registry.clone(), push_interval))?;

        Ok(registry)
    }
}

fn spawn_forwarder(forwarder: Forwarder<MetricRegistry>) -> Result<(), BuildError> {
    std::thread::Builder::new()
        .name("metrics-pusher-dogstatsd".to_string())
        .spawn(move || forwarder.run())
        .map_err(|_| BuildError::Backend)?;

    Ok(())
}

impl Default for DogStatsDPusherBuilder {
    fn default() -> Self {
        DogStatsDPusherBuilder {
            destinations: Vec::new(),
            push_interval: DEFAULT_PUSH_INTERVAL,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            no_workers: false,
            all_gauges: false,
            extra_tags: Vec::new(),
            allowed_metrics: HashSet::new(),
            telemetry: false,
        }
    }
}
