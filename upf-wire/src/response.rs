//! Response envelope returned by the engine for every request.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    pack::{get_f64, get_i32, get_str, get_u16, get_u32, get_u64, get_u8, put_str, Pack, Unpack},
    Error,
};

const PAYLOAD_NONE: u8 = 0;
const PAYLOAD_FLOW_MEASURE: u8 = 1;
const PAYLOAD_PORT_STATS: u8 = 2;

/// Error status of a response. A zero code means success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorStatus {
    /// Engine result code, zero on success.
    pub code: i32,
    /// Error description, empty on success.
    pub errmsg: String,
}

impl ErrorStatus {
    /// A status with the given code and message.
    pub fn new(code: i32, errmsg: impl Into<String>) -> Self {
        Self { code, errmsg: errmsg.into() }
    }

    /// Returns `true` for a zero code.
    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// A single percentile cut-point and its value in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Percentile {
    /// Cut-point, in percent.
    pub percentile: u32,
    /// Value at the cut-point.
    pub value_ns: u64,
}

/// Summary of a latency or jitter distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    /// Number of samples.
    pub count: u64,
    /// Smallest sample.
    pub min_ns: u64,
    /// Mean sample.
    pub avg_ns: u64,
    /// Largest sample.
    pub max_ns: u64,
    /// Requested percentiles.
    pub percentiles: Vec<Percentile>,
}

impl Pack for Histogram {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u64(self.count);
        dst.put_u64(self.min_ns);
        dst.put_u64(self.avg_ns);
        dst.put_u64(self.max_ns);
        dst.put_u16(self.percentiles.len().min(u16::MAX as usize) as u16);
        for p in self.percentiles.iter().take(u16::MAX as usize) {
            dst.put_u32(p.percentile);
            dst.put_u64(p.value_ns);
        }
    }
}

impl Unpack for Histogram {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        let count = get_u64(src)?;
        let min_ns = get_u64(src)?;
        let avg_ns = get_u64(src)?;
        let max_ns = get_u64(src)?;
        let len = get_u16(src)? as usize;
        let mut percentiles = Vec::with_capacity(len);
        for _ in 0..len {
            percentiles.push(Percentile { percentile: get_u32(src)?, value_ns: get_u64(src)? });
        }

        Ok(Self { count, min_ns, avg_ns, max_ns, percentiles })
    }
}

/// Statistics reported by a flow measurement module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowMeasureStats {
    /// Packets measured.
    pub packets: u64,
    /// Bytes measured.
    pub bytes: u64,
    /// Latency distribution.
    pub latency: Histogram,
    /// Jitter distribution.
    pub jitter: Histogram,
}

impl FlowMeasureStats {
    /// Flattens the statistics into `(metric, value)` pairs.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut metrics = vec![
            ("packets".to_string(), self.packets as f64),
            ("bytes".to_string(), self.bytes as f64),
        ];
        for (name, hist) in [("latency", &self.latency), ("jitter", &self.jitter)] {
            metrics.push((format!("{name}.count"), hist.count as f64));
            metrics.push((format!("{name}.min_ns"), hist.min_ns as f64));
            metrics.push((format!("{name}.avg_ns"), hist.avg_ns as f64));
            metrics.push((format!("{name}.max_ns"), hist.max_ns as f64));
            for p in &hist.percentiles {
                metrics.push((format!("{name}.p{}_ns", p.percentile), p.value_ns as f64));
            }
        }

        metrics
    }
}

impl Pack for FlowMeasureStats {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u64(self.packets);
        dst.put_u64(self.bytes);
        self.latency.pack(dst);
        self.jitter.pack(dst);
    }
}

impl Unpack for FlowMeasureStats {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            packets: get_u64(src)?,
            bytes: get_u64(src)?,
            latency: Histogram::unpack(src)?,
            jitter: Histogram::unpack(src)?,
        })
    }
}

/// Counters of one port direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortCounters {
    /// Packets counted.
    pub packets: u64,
    /// Packets dropped.
    pub dropped: u64,
    /// Bytes counted.
    pub bytes: u64,
}

impl Pack for PortCounters {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u64(self.packets);
        dst.put_u64(self.dropped);
        dst.put_u64(self.bytes);
    }
}

impl Unpack for PortCounters {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self { packets: get_u64(src)?, dropped: get_u64(src)?, bytes: get_u64(src)? })
    }
}

/// Port statistics as reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PortStats {
    /// Received direction.
    pub inc: PortCounters,
    /// Sent direction.
    pub out: PortCounters,
    /// Engine timestamp of the sample, in seconds.
    pub timestamp: f64,
}

impl PortStats {
    /// Flattens the counters into `(metric, value)` pairs.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut metrics = Vec::with_capacity(7);
        for (name, counters) in [("inc", &self.inc), ("out", &self.out)] {
            metrics.push((format!("{name}.packets"), counters.packets as f64));
            metrics.push((format!("{name}.dropped"), counters.dropped as f64));
            metrics.push((format!("{name}.bytes"), counters.bytes as f64));
        }
        metrics.push(("timestamp".to_string(), self.timestamp));

        metrics
    }
}

impl Pack for PortStats {
    fn pack(&self, dst: &mut BytesMut) {
        self.inc.pack(dst);
        self.out.pack(dst);
        dst.put_f64(self.timestamp);
    }
}

impl Unpack for PortStats {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            inc: PortCounters::unpack(src)?,
            out: PortCounters::unpack(src)?,
            timestamp: get_f64(src)?,
        })
    }
}

/// The typed payload of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Reply to a flow measurement read.
    FlowMeasure(FlowMeasureStats),
    /// Reply to a port statistics request.
    PortStats(PortStats),
    /// A payload type this crate does not know. Kept undecoded.
    Opaque {
        /// Payload type tag.
        tag: u8,
        /// Undecoded body.
        body: Bytes,
    },
}

impl Payload {
    /// Flattens the payload into `(metric, value)` pairs. Opaque payloads yield nothing.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        match self {
            Self::FlowMeasure(stats) => stats.metrics(),
            Self::PortStats(stats) => stats.metrics(),
            Self::Opaque { .. } => Vec::new(),
        }
    }
}

/// Response to a [`Request`](crate::Request).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Outcome of the request.
    pub error: ErrorStatus,
    /// Payload, if the request returns one.
    pub data: Option<Payload>,
}

impl Response {
    /// A successful response without payload.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A successful response carrying `data`.
    pub fn with_data(data: Payload) -> Self {
        Self { error: ErrorStatus::default(), data: Some(data) }
    }

    /// A failed response.
    pub fn failure(code: i32, errmsg: impl Into<String>) -> Self {
        Self { error: ErrorStatus::new(code, errmsg), data: None }
    }

    /// Returns `true` if the error code is zero.
    pub const fn is_ok(&self) -> bool {
        self.error.is_ok()
    }
}

impl Pack for Response {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_i32(self.error.code);
        put_str(dst, &self.error.errmsg);

        match &self.data {
            None => dst.put_u8(PAYLOAD_NONE),
            Some(Payload::FlowMeasure(stats)) => {
                dst.put_u8(PAYLOAD_FLOW_MEASURE);
                stats.pack(dst);
            }
            Some(Payload::PortStats(stats)) => {
                dst.put_u8(PAYLOAD_PORT_STATS);
                stats.pack(dst);
            }
            Some(Payload::Opaque { tag, body }) => {
                dst.put_u8(*tag);
                dst.put_slice(body);
            }
        }
    }
}

impl Unpack for Response {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        let code = get_i32(src)?;
        let errmsg = get_str(src)?;

        let data = match get_u8(src)? {
            PAYLOAD_NONE => None,
            PAYLOAD_FLOW_MEASURE => Some(Payload::FlowMeasure(FlowMeasureStats::unpack(src)?)),
            PAYLOAD_PORT_STATS => Some(Payload::PortStats(PortStats::unpack(src)?)),
            tag => {
                tracing::debug!(tag, "keeping unknown payload undecoded");
                Some(Payload::Opaque { tag, body: src.split_off(0) })
            }
        };

        Ok(Self { error: ErrorStatus { code, errmsg }, data })
    }
}
