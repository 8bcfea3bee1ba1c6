use metrics::{counter, Counter};

/// Pusher telemetry.
///
/// `Telemetry` collects information about the pusher's behavior and can be optionally enabled to record this
/// information as normal metrics through the global recorder.
pub struct Telemetry {
    records_pushed: Counter,
    records_dropped: Counter,
    records_filtered: Counter,
    packets_sent: Counter,
    packets_dropped: Counter,
    bytes_sent: Counter,
    bytes_dropped: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new() -> Self {
        Self {
            records_pushed: counter!("dogstatsd.pusher.records_pushed"),
            records_dropped: counter!("dogstatsd.pusher.records_dropped"),
            records_filtered: counter!("dogstatsd.pusher.records_filtered"),
            packets_sent: counter!("dogstatsd.pusher.packets_sent"),
            packets_dropped: counter!("dogstatsd.pusher.packets_dropped"),
            bytes_sent: counter!("dogstatsd.pusher.bytes_sent"),
            bytes_dropped: counter!("dogstatsd.pusher.bytes_dropped"),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    pub fn apply_update(&mut self, update: &TelemetryUpdate) {
        self.records_pushed.increment(update.records_pushed);
        self.records_dropped.increment(update.records_dropped);
        self.records_filtered.increment(update.records_filtered);
        self.packets_sent.increment(update.packets_sent);
        self.packets_dropped.increment(update.packets_dropped);
        self.bytes_sent.increment(update.bytes_sent);
        self.bytes_dropped.increment(update.bytes_dropped);
    }
}

/// A buffer for collecting telemetry updates over a push cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryUpdate {
    records_pushed: u64,
    records_dropped: u64,
    records_filtered: u64,
    packets_sent: u64,
    packets_dropped: u64,
    bytes_sent: u64,
    bytes_dropped: u64,
}

impl TelemetryUpdate {
    /// Returns `true` if any records were processed.
    pub fn had_updates(&self) -> bool {
        self.records_pushed > 0 || self.records_dropped > 0 || self.records_filtered > 0
    }

    pub fn records_pushed(&self) -> u64 {
        self.records_pushed
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped
    }

    pub fn records_filtered(&self) -> u64 {
        self.records_filtered
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped
    }

    /// Tracks a record that was skipped by a filter.
    pub fn track_record_filtered(&mut self) {
        self.records_filtered += 1;
    }

    /// Tracks a record that could not be turned into a packet.
    pub fn track_record_dropped(&mut self) {
        self.records_dropped += 1;
    }

    /// Tracks a successful packet send.
    pub fn track_packet_send_succeeded(&mut self, bytes_len: usize) {
        self.records_pushed += 1;
        self.packets_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    /// Tracks a failed packet send.
    pub fn track_packet_send_failed(&mut self, bytes_len: usize) {
        self.records_dropped += 1;
        self.packets_dropped += 1;
        self.bytes_dropped += bytes_len as u64;
    }
}
