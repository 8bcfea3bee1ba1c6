use thiserror::Error;

use crate::tags::ExtractedName;

pub(crate) const SMALLEST_VALID_PAYLOAD: &[u8] = b"a.a:0|c";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Counter => b"|c",
            MetricType::Gauge => b"|g",
        }
    }
}

/// Errors that could occur while assembling a packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The packet would have exceeded the maximum payload length.
    #[error("packet exceeds the maximum payload length of {max_payload_len} bytes")]
    PayloadTooLarge {
        /// The maximum payload length.
        max_payload_len: usize,
    },
}

/// A single metric sample, ready to be written.
pub(crate) struct Metric<'a> {
    /// The clean name and derived tags extracted from `name`.
    pub extracted: &'a ExtractedName<'a>,

    pub value: i64,
    pub metric_type: MetricType,
}

/// Assembles DogStatsD packets, one metric per packet.
///
/// A single buffer is reused for every packet, and is reset at the start of each write. Every append is checked against
/// the maximum payload length, and a write that would exceed it is rejected as a whole, leaving the buffer empty.
///
/// Packets have the form `<prefix>.<name>:<value>|<type>[|#tags]`, with no trailing newline.
pub(crate) struct PacketWriter {
    max_payload_len: usize,
    buf: Vec<u8>,
    int_writer: itoa::Buffer,
}

impl PacketWriter {
    /// Creates a new `PacketWriter` with the given maximum payload length.
    pub fn new(max_payload_len: usize) -> Self {
        // NOTE: This is validated in the builder, but we double check here that we're getting a sanitized value.
        assert!(
            max_payload_len >= SMALLEST_VALID_PAYLOAD.len(),
            "maximum payload length is too small to allow any metrics to be written (must be {} or greater)",
            SMALLEST_VALID_PAYLOAD.len()
        );

        Self { max_payload_len, buf: Vec::new(), int_writer: itoa::Buffer::new() }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        if self.buf.len() + bytes.len() > self.max_payload_len {
            return Err(WriteError::PayloadTooLarge { max_payload_len: self.max_payload_len });
        }

        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn write_name(&mut self, prefix: Option<&str>, metric: &Metric<'_>) -> Result<(), WriteError> {
        if let Some(prefix) = prefix {
            self.append(prefix.as_bytes())?;
            self.append(b".")?;
        }

        let segments = metric.extracted.segments();
        debug_assert!(!segments.is_empty(), "extraction always yields at least one segment");

        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                self.append(b".")?;
            }
            self.append(segment.as_bytes())?;
        }

        Ok(())
    }

    fn write_value(&mut self, value: i64, metric_type: MetricType) -> Result<(), WriteError> {
        self.append(b":")?;

        let value_str = self.int_writer.format(value);
        if self.buf.len() + value_str.len() > self.max_payload_len {
            return Err(WriteError::PayloadTooLarge { max_payload_len: self.max_payload_len });
        }
        self.buf.extend_from_slice(value_str.as_bytes());

        self.append(metric_type.as_bytes())
    }

    fn write_tags(&mut self, metric: &Metric<'_>, static_tags: &[String]) -> Result<(), WriteError> {
        // Derived tags come first, and static tags are appended after them in a single tag block.
        let mut wrote_tag = false;
        for tag in metric.extracted.tags() {
            self.append(if wrote_tag { b"," } else { b"|#" })?;
            self.append(tag.key().as_bytes())?;
            self.append(b":")?;
            self.append(tag.value().as_bytes())?;
            wrote_tag = true;
        }

        for tag in static_tags.iter().filter(|tag| !tag.is_empty()) {
            self.append(if wrote_tag { b"," } else { b"|#" })?;
            self.append(tag.as_bytes())?;
            wrote_tag = true;
        }

        Ok(())
    }

    /// Writes a single metric packet, returning the packet on success.
    ///
    /// When `prefix` is `None`, the metric name is written without a prefix.
    pub fn write_metric(
        &mut self,
        prefix: Option<&str>,
        metric: &Metric<'_>,
        static_tags: &[String],
    ) -> Result<&[u8], WriteError> {
        self.buf.clear();

        let result = self
            .write_name(prefix, metric)
            .and_then(|()| self.write_value(metric.value, metric.metric_type))
            .and_then(|()| self.write_tags(metric, static_tags));

        match result {
            Ok(()) => Ok(&self.buf),
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }
}
