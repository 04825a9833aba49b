//! Token-bucket parameters of QoS enforcement rules.
//!
//! The engine meters every QER direction with a two-rate policer. Its rates are
//! expressed in bytes per second and its burst sizes in bytes, while QERs carry
//! bit rates in kbps and a burst duration in milliseconds.

use upf_wire::QosValues;

use crate::rules::{ACCESS, CORE};

/// Bit rates of a QER, in kbps, with the burst duration used to size the buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QosRates {
    /// Uplink guaranteed bit rate.
    pub ul_gbr: u64,
    /// Uplink maximum bit rate.
    pub ul_mbr: u64,
    /// Downlink guaranteed bit rate.
    pub dl_gbr: u64,
    /// Downlink maximum bit rate.
    pub dl_mbr: u64,
    /// Time the buckets should absorb a burst at full rate.
    pub burst_duration_ms: u64,
}

/// Parameters of one two-rate policer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenBucket {
    /// Committed information rate, bytes/s.
    pub cir: u64,
    /// Peak information rate, bytes/s.
    pub pir: u64,
    /// Committed burst size, bytes.
    pub cbs: u64,
    /// Peak burst size, bytes.
    pub pbs: u64,
    /// Excess burst size, bytes. Always equal to `pbs`.
    pub ebs: u64,
}

impl From<TokenBucket> for QosValues {
    fn from(bucket: TokenBucket) -> Self {
        Self { cir: bucket.cir, pir: bucket.pir, cbs: bucket.cbs, pbs: bucket.pbs, ebs: bucket.ebs }
    }
}

/// Policers of both directions of a QER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenBuckets {
    /// Installed with source interface `ACCESS`.
    pub uplink: TokenBucket,
    /// Installed with source interface `CORE`.
    pub downlink: TokenBucket,
}

impl TokenBuckets {
    /// The policer of `direction`.
    pub const fn get(&self, direction: Direction) -> TokenBucket {
        match direction {
            Direction::Uplink => self.uplink,
            Direction::Downlink => self.downlink,
        }
    }
}

/// Traffic direction of a policer. The engine keys directional state by source interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the UE towards the data network.
    Uplink,
    /// From the data network towards the UE.
    Downlink,
}

impl Direction {
    /// Both directions, in installation order.
    pub const ALL: [Direction; 2] = [Direction::Uplink, Direction::Downlink];

    /// Uplink traffic enters on the access side, downlink on the core side.
    pub const fn src_iface(&self) -> u8 {
        match self {
            Self::Uplink => ACCESS,
            Self::Downlink => CORE,
        }
    }

    /// Direction name used in logs and errors.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uplink => "uplink",
            Self::Downlink => "downlink",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts QER bit rates into policer parameters.
///
/// Conversion is pure: identical inputs always give identical buckets, so a rule can
/// be re-installed without changing the engine's state. Arithmetic saturates at
/// `u64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateConverter {
    min_burst_size: u64,
}

impl Default for RateConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateConverter {
    /// Smallest burst size handed out by default, in bytes.
    pub const DEFAULT_MIN_BURST_SIZE: u64 = 1;

    /// A converter with the default minimum burst size.
    pub const fn new() -> Self {
        Self { min_burst_size: Self::DEFAULT_MIN_BURST_SIZE }
    }

    /// Sets the smallest burst size handed to the engine. Zero-sized bursts are
    /// invalid, so a minimum of 0 is raised to 1.
    pub const fn with_min_burst_size(mut self, min_burst_size: u64) -> Self {
        self.min_burst_size = if min_burst_size == 0 { 1 } else { min_burst_size };
        self
    }

    /// The smallest burst size handed out, in bytes.
    pub const fn min_burst_size(&self) -> u64 {
        self.min_burst_size
    }

    /// Policers of both directions of `rates`.
    pub fn convert(&self, rates: &QosRates) -> TokenBuckets {
        TokenBuckets {
            uplink: self.bucket(rates.ul_gbr, rates.ul_mbr, rates.burst_duration_ms),
            downlink: self.bucket(rates.dl_gbr, rates.dl_mbr, rates.burst_duration_ms),
        }
    }

    /// Policer for a single direction.
    pub fn bucket(&self, gbr_kbps: u64, mbr_kbps: u64, burst_duration_ms: u64) -> TokenBucket {
        let gbr = bytes_per_sec(gbr_kbps);
        let mbr = bytes_per_sec(mbr_kbps);

        let cbs = burst_size(gbr, burst_duration_ms).max(self.min_burst_size);
        let pbs = burst_size(mbr, burst_duration_ms).max(self.min_burst_size);

        // An unmetered direction still needs a non-zero rate.
        let (cir, pir) = if gbr_kbps == 0 && mbr_kbps == 0 {
            (1, 1)
        } else {
            let cir = gbr.max(1);
            (cir, mbr.max(cir))
        };

        TokenBucket { cir, pir, cbs, pbs, ebs: pbs }
    }
}

#[inline]
const fn bytes_per_sec(kbps: u64) -> u64 {
    // kbps * 1000 / 8
    kbps.saturating_mul(125)
}

#[inline]
fn burst_size(rate: u64, duration_ms: u64) -> u64 {
    let bytes = u128::from(rate) * u128::from(duration_ms) / 1000;
    u64::try_from(bytes).unwrap_or(u64::MAX)
}
