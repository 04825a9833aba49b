use std::collections::{btree_map, BTreeMap};

use bytes::Bytes;
use upf_transport::ClientTransport;
use upf_wire::{FlowMeasureReadArg, Payload, Response};

use crate::{client::CallOptions, error::ClientError, ControlClient};

/// Percentile cut-points read when the caller has no preference.
pub const DEFAULT_PERCENTILES: [u32; 3] = [50, 90, 99];

/// Measures flows before QoS enforcement.
pub const PRE_QOS_MODULE: &str = "preQosFlowMeasure";
/// Measures downlink flows after QoS enforcement.
pub const POST_DL_QOS_MODULE: &str = "postDLQosFlowMeasure";
/// Measures uplink flows after QoS enforcement.
pub const POST_UL_QOS_MODULE: &str = "postULQosFlowMeasure";

/// Metric name to value, e.g. `latency.p99_ns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    metrics: BTreeMap<String, f64>,
    /// Payload of a type the client could not flatten.
    opaque: Option<(u8, Bytes)>,
}

impl Statistics {
    fn from_response(response: Response) -> Self {
        match response.data {
            Some(Payload::Opaque { tag, body }) => {
                Self { metrics: BTreeMap::new(), opaque: Some((tag, body)) }
            }
            Some(payload) => payload.metrics().into_iter().collect(),
            None => Self::default(),
        }
    }

    /// The value of `metric`, if present.
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied()
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if there are no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Metrics in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, f64> {
        self.metrics.iter()
    }

    /// The undecoded payload, if the engine answered with one of an unknown type.
    pub fn opaque(&self) -> Option<(u8, &Bytes)> {
        self.opaque.as_ref().map(|(tag, body)| (*tag, body))
    }

    /// The metrics map.
    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.metrics
    }
}

impl FromIterator<(String, f64)> for Statistics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self { metrics: iter.into_iter().collect(), opaque: None }
    }
}

impl<'a> IntoIterator for &'a Statistics {
    type Item = (&'a String, &'a f64);
    type IntoIter = btree_map::Iter<'a, String, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Flow statistics before QoS enforcement and after it in each direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatistics {
    /// Before QoS enforcement.
    pub pre_qos: Statistics,
    /// Downlink, after QoS enforcement.
    pub post_dl_qos: Statistics,
    /// Uplink, after QoS enforcement.
    pub post_ul_qos: Statistics,
}

/// Reads the engine's flow measurement modules.
pub struct StatsReader<'a, T: ClientTransport> {
    client: &'a ControlClient<T>,
}

impl<'a, T: ClientTransport> StatsReader<'a, T> {
    /// A reader issuing reads through `client`.
    pub fn new(client: &'a ControlClient<T>) -> Self {
        Self { client }
    }

    /// Reads flow counters and latency and jitter at `percentiles`. With `clear`
    /// the engine resets the module's counters, so the read is not repeatable.
    pub async fn read(
        &self,
        module: &str,
        clear: bool,
        percentiles: &[u32],
    ) -> Result<Statistics, ClientError> {
        let arg = FlowMeasureReadArg::new(clear, percentiles);
        let response = self.client.read(module, arg, CallOptions::default()).await?;

        let stats = Statistics::from_response(response);
        tracing::debug!(module, metrics = stats.len(), "read flow measurement");

        Ok(stats)
    }

    /// Clearing read of the three flow measurement modules.
    pub async fn session_stats(&self, percentiles: &[u32]) -> Result<SessionStatistics, ClientError> {
        Ok(SessionStatistics {
            pre_qos: self.read(PRE_QOS_MODULE, true, percentiles).await?,
            post_dl_qos: self.read(POST_DL_QOS_MODULE, true, percentiles).await?,
            post_ul_qos: self.read(POST_UL_QOS_MODULE, true, percentiles).await?,
        })
    }

    /// Port counters of interface `ifname`, flattened.
    pub async fn port(&self, ifname: &str) -> Result<Statistics, ClientError> {
        let stats = self.client.port_stats(ifname).await?;
        Ok(stats.metrics().into_iter().collect())
    }
}
