//! Value types of the rules installed into the engine.
//!
//! Rules are plain structs built with named fields and `..Default::default()`.
//! They are never changed once installed: an update is a delete followed by an add.

use std::fmt;

use thiserror::Error;
use upf_wire::{
    AddAppQosArg, AddFarArg, AddPdrArg, AddSessionQosArg, DeletePdrArg, FarKeys, FarValues,
    PdrKeys, PdrValues, QosKeys,
};

use crate::qos::{Direction, QosRates, TokenBucket};

/// Source interface on the access side (N3), where uplink traffic enters.
pub const ACCESS: u8 = 1;
/// Source interface on the core side (N6/N9), where downlink traffic enters.
pub const CORE: u8 = 2;

/// FAR destination towards the access side.
pub const DST_ACCESS: u8 = 0;
/// FAR destination towards the core side.
pub const DST_CORE: u8 = 1;

/// 3GPP interface name of the RAN user plane.
pub const N3: u8 = 0;
/// 3GPP interface name of the data network.
pub const N6: u8 = 1;
/// 3GPP interface name between UPFs.
pub const N9: u8 = 2;

/// FAR apply-action bit: drop matching packets.
pub const ACTION_DROP: u8 = 0x1;
/// FAR apply-action bit: forward matching packets to `dst_intf`.
pub const ACTION_FORWARD: u8 = 0x2;
/// FAR apply-action bit: buffer matching packets.
pub const ACTION_BUFFER: u8 = 0x4;
/// FAR apply-action bit: notify the control plane.
pub const ACTION_NOTIFY: u8 = 0x8;

/// QER gate state: traffic is metered.
pub const GATE_METER: u8 = 0;
/// QER gate state: traffic is dropped.
pub const GATE_DROP: u8 = 5;
/// QER gate state: traffic passes unmetered.
pub const GATE_UNMETER: u8 = 6;

/// QoS flow identifier of a default bearer.
pub const QFI_DEFAULT: u8 = 9;
/// Burst duration QERs are sized for unless set.
pub const DEFAULT_BURST_DURATION_MS: u64 = 1000;

/// A rule that cannot be encoded for the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// No action bit is set.
    #[error("FAR {far_id} has no action bit set in mask {mask:#x}")]
    InvalidActionMask {
        /// The offending rule.
        far_id: u32,
        /// The action mask as given.
        mask: u8,
    },
    /// A forwarding FAR names neither `DST_ACCESS` nor `DST_CORE`.
    #[error("FAR {far_id} forwards to unknown destination interface {dst_intf}")]
    UnknownDestination {
        /// The offending rule.
        far_id: u32,
        /// The destination interface as given.
        dst_intf: u8,
    },
}

/// Packet detection rule.
///
/// Every match field has its own mask; a zero mask matches any value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pdr {
    /// Source interface, `ACCESS` or `CORE`.
    pub src_iface: u8,
    /// Outer destination address of GTP-U traffic.
    pub tunnel_ip4_dst: u32,
    /// Tunnel endpoint identifier.
    pub tunnel_teid: u32,
    /// Inner source address.
    pub src_ip: u32,
    /// Inner destination address.
    pub dst_ip: u32,
    /// Inner source port.
    pub src_port: u16,
    /// Inner destination port.
    pub dst_port: u16,
    /// IP protocol number.
    pub proto: u8,

    /// Mask of `src_iface`.
    pub src_iface_mask: u8,
    /// Mask of `tunnel_ip4_dst`.
    pub tunnel_ip4_dst_mask: u32,
    /// Mask of `tunnel_teid`.
    pub tunnel_teid_mask: u32,
    /// Mask of `src_ip`.
    pub src_ip_mask: u32,
    /// Mask of `dst_ip`.
    pub dst_ip_mask: u32,
    /// Mask of `src_port`.
    pub src_port_mask: u16,
    /// Mask of `dst_port`.
    pub dst_port_mask: u16,
    /// Mask of `proto`.
    pub proto_mask: u8,

    /// Higher precedence wins.
    pub precedence: u32,
    /// Rule identifier within the session.
    pub pdr_id: u64,
    /// Session endpoint identifier.
    pub fse_id: u32,
    /// Address of the session endpoint.
    pub fseid_ip: u32,
    /// Counter index.
    pub ctr_id: u32,
    /// FAR applied to matching packets.
    pub far_id: u32,
    /// QERs applied to matching packets. Only the first reaches the engine.
    pub qer_ids: Vec<u32>,
    /// Strip the GTP-U header.
    pub need_decap: bool,
    /// The UE address is allocated by the UPF.
    pub alloc_ip: bool,
}

impl Pdr {
    /// The engine sorts entries by ascending priority, so precedence is inverted.
    pub const fn priority(&self) -> u32 {
        u32::MAX - self.precedence
    }

    /// The engine references a single QER per PDR: the first of the list, or 0.
    pub fn qer_id(&self) -> u32 {
        self.qer_ids.first().copied().unwrap_or(0)
    }

    /// Match fields.
    pub const fn keys(&self) -> PdrKeys {
        PdrKeys {
            src_iface: self.src_iface,
            tunnel_ip4_dst: self.tunnel_ip4_dst,
            tunnel_teid: self.tunnel_teid,
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            proto: self.proto,
        }
    }

    /// Masks of the match fields.
    pub const fn masks(&self) -> PdrKeys {
        PdrKeys {
            src_iface: self.src_iface_mask,
            tunnel_ip4_dst: self.tunnel_ip4_dst_mask,
            tunnel_teid: self.tunnel_teid_mask,
            src_ip: self.src_ip_mask,
            dst_ip: self.dst_ip_mask,
            src_port: self.src_port_mask,
            dst_port: self.dst_port_mask,
            proto: self.proto_mask,
        }
    }

    /// Actions of the entry.
    pub fn values(&self) -> PdrValues {
        PdrValues {
            pdr_id: self.pdr_id,
            fse_id: self.fse_id,
            ctr_id: self.ctr_id,
            qer_id: self.qer_id(),
            far_id: self.far_id,
            need_decap: self.need_decap,
        }
    }

    /// Argument of `add_pdr`.
    pub fn add_arg(&self) -> AddPdrArg {
        AddPdrArg {
            priority: self.priority(),
            keys: self.keys(),
            masks: self.masks(),
            values: self.values(),
        }
    }

    /// Masks are part of the key: overlapping wildcard entries differ only by mask.
    pub const fn delete_arg(&self) -> DeletePdrArg {
        DeletePdrArg { keys: self.keys(), masks: self.masks() }
    }
}

impl fmt::Display for Pdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PDR {} (fseid {})", self.pdr_id, self.fse_id)
    }
}

/// Action code the engine executes for a FAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FarAction {
    /// Forward towards the access side.
    ForwardDownlink = 0,
    /// Forward towards the core side.
    ForwardUplink = 1,
    /// Drop matching packets.
    Drop = 2,
    /// Buffering is not implemented by the engine and is reported like a notification.
    Notify = 3,
}

impl FarAction {
    /// Wire code of the action.
    pub const fn code(&self) -> u8 {
        *self as u8
    }
}

/// Forwarding action rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Far {
    /// Rule identifier within the session.
    pub far_id: u32,
    /// Session endpoint identifier.
    pub fse_id: u32,
    /// Address of the session endpoint.
    pub fseid_ip: u32,

    /// `DST_ACCESS` or `DST_CORE`.
    pub dst_intf: u8,
    /// Send a GTP-U end marker when the tunnel changes.
    pub send_end_marker: bool,
    /// Bitmask of `ACTION_*`.
    pub apply_action: u8,
    /// Outer header to add, 0 for none.
    pub tunnel_type: u8,
    /// Outer source address.
    pub tunnel_ip4_src: u32,
    /// Outer destination address.
    pub tunnel_ip4_dst: u32,
    /// Tunnel endpoint identifier of the peer.
    pub tunnel_teid: u32,
    /// Outer UDP port.
    pub tunnel_port: u16,
}

impl Far {
    /// Derives the single action code of this FAR. Forward takes precedence, then
    /// drop, then buffer and notify.
    pub const fn action(&self) -> Result<FarAction, RuleError> {
        if self.apply_action & ACTION_FORWARD != 0 {
            match self.dst_intf {
                DST_ACCESS => Ok(FarAction::ForwardDownlink),
                DST_CORE => Ok(FarAction::ForwardUplink),
                dst_intf => Err(RuleError::UnknownDestination { far_id: self.far_id, dst_intf }),
            }
        } else if self.apply_action & ACTION_DROP != 0 {
            Ok(FarAction::Drop)
        } else if self.apply_action & (ACTION_BUFFER | ACTION_NOTIFY) != 0 {
            Ok(FarAction::Notify)
        } else {
            Err(RuleError::InvalidActionMask { far_id: self.far_id, mask: self.apply_action })
        }
    }

    /// Key of the entry.
    pub const fn keys(&self) -> FarKeys {
        FarKeys { far_id: self.far_id, fse_id: self.fse_id }
    }

    /// Values of the entry, with the derived action code.
    pub fn values(&self) -> Result<FarValues, RuleError> {
        Ok(FarValues {
            action: self.action()?.code(),
            tunnel_type: self.tunnel_type,
            tunnel_ip4_src: self.tunnel_ip4_src,
            tunnel_ip4_dst: self.tunnel_ip4_dst,
            tunnel_teid: self.tunnel_teid,
            tunnel_port: self.tunnel_port,
            send_end_marker: self.send_end_marker,
        })
    }

    /// Argument of `add_far`.
    pub fn add_arg(&self) -> Result<AddFarArg, RuleError> {
        Ok(AddFarArg { keys: self.keys(), values: self.values()? })
    }
}

impl fmt::Display for Far {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FAR {} (fseid {})", self.far_id, self.fse_id)
    }
}

/// QoS enforcement rule. Installed as an application or a session policer,
/// once per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qer {
    /// One of `GATE_*`.
    pub gate: u8,
    /// Rule identifier within the session.
    pub qer_id: u32,
    /// QoS flow identifier.
    pub qfi: u8,
    /// Uplink gate status.
    pub ul_status: u8,
    /// Downlink gate status.
    pub dl_status: u8,
    /// Uplink maximum bit rate. All rates are in kbps.
    pub ul_mbr: u64,
    /// Downlink maximum bit rate.
    pub dl_mbr: u64,
    /// Uplink guaranteed bit rate.
    pub ul_gbr: u64,
    /// Downlink guaranteed bit rate.
    pub dl_gbr: u64,
    /// Session endpoint identifier.
    pub fse_id: u32,
    /// Address of the session endpoint.
    pub fseid_ip: u32,
    /// Burst duration the buckets are sized for.
    pub burst_duration_ms: u64,
}

impl Default for Qer {
    fn default() -> Self {
        Self {
            gate: GATE_METER,
            qer_id: 0,
            qfi: QFI_DEFAULT,
            ul_status: 0,
            dl_status: 0,
            ul_mbr: 0,
            dl_mbr: 0,
            ul_gbr: 0,
            dl_gbr: 0,
            fse_id: 0,
            fseid_ip: 0,
            burst_duration_ms: DEFAULT_BURST_DURATION_MS,
        }
    }
}

impl Qer {
    /// Rates to hand to a [`RateConverter`](crate::RateConverter).
    pub const fn rates(&self) -> QosRates {
        QosRates {
            ul_gbr: self.ul_gbr,
            ul_mbr: self.ul_mbr,
            dl_gbr: self.dl_gbr,
            dl_mbr: self.dl_mbr,
            burst_duration_ms: self.burst_duration_ms,
        }
    }

    /// Key of the policer for `direction`.
    pub const fn keys(&self, direction: Direction) -> QosKeys {
        QosKeys { src_iface: direction.src_iface(), qer_id: self.qer_id, fse_id: self.fse_id }
    }

    /// Argument of `add_app_qos` for `direction`.
    pub fn app_add_arg(&self, direction: Direction, bucket: TokenBucket) -> AddAppQosArg {
        AddAppQosArg { keys: self.keys(direction), qos: bucket.into(), qfi: self.qfi }
    }

    /// Argument of `add_session_qos` for `direction`.
    pub fn session_add_arg(&self, direction: Direction, bucket: TokenBucket) -> AddSessionQosArg {
        AddSessionQosArg { keys: self.keys(direction), qos: bucket.into() }
    }
}

impl fmt::Display for Qer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QER {} (fseid {})", self.qer_id, self.fse_id)
    }
}

/// Any rule a session can install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// A packet detection rule.
    Pdr(Pdr),
    /// A forwarding action rule.
    Far(Far),
    /// A QER installed as application policers.
    AppQer(Qer),
    /// A QER installed as session policers.
    SessionQer(Qer),
}

impl From<Pdr> for Rule {
    fn from(pdr: Pdr) -> Self {
        Self::Pdr(pdr)
    }
}

impl From<Far> for Rule {
    fn from(far: Far) -> Self {
        Self::Far(far)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdr(pdr) => fmt::Display::fmt(pdr, f),
            Self::Far(far) => fmt::Display::fmt(far, f),
            Self::AppQer(qer) => write!(f, "application {qer}"),
            Self::SessionQer(qer) => write!(f, "session {qer}"),
        }
    }
}
