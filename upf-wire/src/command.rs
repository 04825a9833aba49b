//! Typed command envelope sent to the data-plane engine.
//!
//! Every command is a variant of [`CommandArg`]. The command string on the wire is
//! derived from the variant, and the argument layout is selected by the command
//! string when unpacking, so a request can never carry an argument of the wrong type.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    pack::{
        get_bool, get_str, get_u16, get_u32, get_u32_list, get_u64, get_u8, put_bool, put_str,
        put_u32_list, Pack, Unpack,
    },
    Error,
};

/// Tag of a module command request.
const REQUEST_MODULE: u8 = 1;
/// Tag of a port statistics request.
const REQUEST_PORT_STATS: u8 = 2;

/// The command names understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Install a packet detection rule.
    AddPdr,
    /// Remove a packet detection rule.
    DeletePdr,
    /// Install a forwarding action rule.
    AddFar,
    /// Remove a forwarding action rule.
    DeleteFar,
    /// Install an application QoS policer.
    AddAppQos,
    /// Remove an application QoS policer.
    DeleteAppQos,
    /// Install a session QoS policer.
    AddSessionQos,
    /// Remove a session QoS policer.
    DeleteSessionQos,
    /// Read a flow measurement module.
    Read,
}

impl CommandKind {
    /// The command name as sent on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddPdr => "add_pdr",
            Self::DeletePdr => "delete_pdr",
            Self::AddFar => "add_far",
            Self::DeleteFar => "delete_far",
            Self::AddAppQos => "add_app_qos",
            Self::DeleteAppQos => "delete_app_qos",
            Self::AddSessionQos => "add_session_qos",
            Self::DeleteSessionQos => "delete_session_qos",
            Self::Read => "read",
        }
    }

    /// Parses a command name as sent on the wire.
    pub fn parse(cmd: &str) -> Option<Self> {
        let kind = match cmd {
            "add_pdr" => Self::AddPdr,
            "delete_pdr" => Self::DeletePdr,
            "add_far" => Self::AddFar,
            "delete_far" => Self::DeleteFar,
            "add_app_qos" => Self::AddAppQos,
            "delete_app_qos" => Self::DeleteAppQos,
            "add_session_qos" => Self::AddSessionQos,
            "delete_session_qos" => Self::DeleteSessionQos,
            "read" => Self::Read,
            _ => return None,
        };

        Some(kind)
    }

    /// Returns `true` for commands that remove state from the engine.
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::DeletePdr | Self::DeleteFar | Self::DeleteAppQos | Self::DeleteSessionQos)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PDR match fields. Used both as the match key and as its mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PdrKeys {
    /// Interface the packet arrived on.
    pub src_iface: u8,
    /// Outer destination address of a tunnelled packet.
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
    /// Inner IP protocol.
    pub proto: u8,
}

impl Pack for PdrKeys {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u8(self.src_iface);
        dst.put_u32(self.tunnel_ip4_dst);
        dst.put_u32(self.tunnel_teid);
        dst.put_u32(self.src_ip);
        dst.put_u32(self.dst_ip);
        dst.put_u16(self.src_port);
        dst.put_u16(self.dst_port);
        dst.put_u8(self.proto);
    }
}

impl Unpack for PdrKeys {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            src_iface: get_u8(src)?,
            tunnel_ip4_dst: get_u32(src)?,
            tunnel_teid: get_u32(src)?,
            src_ip: get_u32(src)?,
            dst_ip: get_u32(src)?,
            src_port: get_u16(src)?,
            dst_port: get_u16(src)?,
            proto: get_u8(src)?,
        })
    }
}

/// PDR outcome fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdrValues {
    /// Rule identifier.
    pub pdr_id: u64,
    /// Session identifier.
    pub fse_id: u32,
    /// Counter index.
    pub ctr_id: u32,
    /// QER applied to matching packets.
    pub qer_id: u32,
    /// FAR applied to matching packets.
    pub far_id: u32,
    /// Strip the tunnel header before forwarding.
    pub need_decap: bool,
}

impl Pack for PdrValues {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u64(self.pdr_id);
        dst.put_u32(self.fse_id);
        dst.put_u32(self.ctr_id);
        dst.put_u32(self.qer_id);
        dst.put_u32(self.far_id);
        put_bool(dst, self.need_decap);
    }
}

impl Unpack for PdrValues {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            pdr_id: get_u64(src)?,
            fse_id: get_u32(src)?,
            ctr_id: get_u32(src)?,
            qer_id: get_u32(src)?,
            far_id: get_u32(src)?,
            need_decap: get_bool(src)?,
        })
    }
}

/// Arguments of `add_pdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddPdrArg {
    /// Inverted precedence: the engine sorts ascending.
    pub priority: u32,
    /// Match key.
    pub keys: PdrKeys,
    /// Bits of `keys` that take part in the match.
    pub masks: PdrKeys,
    /// Outcome of a match.
    pub values: PdrValues,
}

/// Masks are part of the identity of a wildcard entry and must match the ones
/// used on install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePdrArg {
    /// Match key.
    pub keys: PdrKeys,
    /// Bits of `keys` that take part in the match.
    pub masks: PdrKeys,
}

/// Keys of a forwarding action rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FarKeys {
    /// Rule identifier.
    pub far_id: u32,
    /// Session identifier.
    pub fse_id: u32,
}

impl Pack for FarKeys {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u32(self.far_id);
        dst.put_u32(self.fse_id);
    }
}

impl Unpack for FarKeys {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self { far_id: get_u32(src)?, fse_id: get_u32(src)? })
    }
}

/// Outcome fields of a forwarding action rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FarValues {
    /// Derived action code, see `FarAction` in `upf-ctl`.
    pub action: u8,
    /// Encapsulation applied, zero for none.
    pub tunnel_type: u8,
    /// Outer source address.
    pub tunnel_ip4_src: u32,
    /// Outer destination address.
    pub tunnel_ip4_dst: u32,
    /// Tunnel endpoint identifier.
    pub tunnel_teid: u32,
    /// Outer UDP port.
    pub tunnel_port: u16,
    /// Send an end marker when the tunnel changes.
    pub send_end_marker: bool,
}

impl Pack for FarValues {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u8(self.action);
        dst.put_u8(self.tunnel_type);
        dst.put_u32(self.tunnel_ip4_src);
        dst.put_u32(self.tunnel_ip4_dst);
        dst.put_u32(self.tunnel_teid);
        dst.put_u16(self.tunnel_port);
        put_bool(dst, self.send_end_marker);
    }
}

impl Unpack for FarValues {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            action: get_u8(src)?,
            tunnel_type: get_u8(src)?,
            tunnel_ip4_src: get_u32(src)?,
            tunnel_ip4_dst: get_u32(src)?,
            tunnel_teid: get_u32(src)?,
            tunnel_port: get_u16(src)?,
            send_end_marker: get_bool(src)?,
        })
    }
}

/// Arguments of `add_far`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddFarArg {
    /// Rule keys.
    pub keys: FarKeys,
    /// Rule outcome.
    pub values: FarValues,
}

/// Keys of a directional QoS entry. `src_iface` selects the direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QosKeys {
    /// Interface whose traffic is policed.
    pub src_iface: u8,
    /// QER identifier.
    pub qer_id: u32,
    /// Session identifier.
    pub fse_id: u32,
}

impl Pack for QosKeys {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u8(self.src_iface);
        dst.put_u32(self.qer_id);
        dst.put_u32(self.fse_id);
    }
}

impl Unpack for QosKeys {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self { src_iface: get_u8(src)?, qer_id: get_u32(src)?, fse_id: get_u32(src)? })
    }
}

/// Token bucket parameters of one policer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QosValues {
    /// Committed information rate.
    pub cir: u64,
    /// Peak information rate.
    pub pir: u64,
    /// Committed burst size.
    pub cbs: u64,
    /// Peak burst size.
    pub pbs: u64,
    /// Excess burst size.
    pub ebs: u64,
}

impl Pack for QosValues {
    fn pack(&self, dst: &mut BytesMut) {
        dst.put_u64(self.cir);
        dst.put_u64(self.pir);
        dst.put_u64(self.cbs);
        dst.put_u64(self.pbs);
        dst.put_u64(self.ebs);
    }
}

impl Unpack for QosValues {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            cir: get_u64(src)?,
            pir: get_u64(src)?,
            cbs: get_u64(src)?,
            pbs: get_u64(src)?,
            ebs: get_u64(src)?,
        })
    }
}

/// Arguments of `add_app_qos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddAppQosArg {
    /// Policer keys.
    pub keys: QosKeys,
    /// Policer parameters.
    pub qos: QosValues,
    /// QoS flow identifier.
    pub qfi: u8,
}

/// Arguments of `add_session_qos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddSessionQosArg {
    /// Policer keys.
    pub keys: QosKeys,
    /// Policer parameters.
    pub qos: QosValues,
}

/// Selects flow counters together with latency and jitter percentiles.
pub const READ_FLOW_LATENCY_JITTER: u32 = 2;

/// Read request for a flow measurement module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMeasureReadArg {
    /// Reset the counters after reading.
    pub clear: bool,
    /// Latency percentile cut-points.
    pub latency_percentiles: Vec<u32>,
    /// Jitter percentile cut-points.
    pub jitter_percentiles: Vec<u32>,
    /// Selects the statistics to read.
    pub flag_to_read: u32,
}

impl FlowMeasureReadArg {
    /// A read of flow, latency and jitter statistics at the given percentiles.
    pub fn new(clear: bool, percentiles: &[u32]) -> Self {
        Self {
            clear,
            latency_percentiles: percentiles.to_vec(),
            jitter_percentiles: percentiles.to_vec(),
            flag_to_read: READ_FLOW_LATENCY_JITTER,
        }
    }
}

impl Pack for FlowMeasureReadArg {
    fn pack(&self, dst: &mut BytesMut) {
        put_bool(dst, self.clear);
        put_u32_list(dst, &self.latency_percentiles);
        put_u32_list(dst, &self.jitter_percentiles);
        dst.put_u32(self.flag_to_read);
    }
}

impl Unpack for FlowMeasureReadArg {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            clear: get_bool(src)?,
            latency_percentiles: get_u32_list(src)?,
            jitter_percentiles: get_u32_list(src)?,
            flag_to_read: get_u32(src)?,
        })
    }
}

/// The typed argument of a module command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    /// See [`CommandKind::AddPdr`].
    AddPdr(AddPdrArg),
    /// See [`CommandKind::DeletePdr`].
    DeletePdr(DeletePdrArg),
    /// See [`CommandKind::AddFar`].
    AddFar(AddFarArg),
    /// See [`CommandKind::DeleteFar`].
    DeleteFar(FarKeys),
    /// See [`CommandKind::AddAppQos`].
    AddAppQos(AddAppQosArg),
    /// See [`CommandKind::DeleteAppQos`].
    DeleteAppQos(QosKeys),
    /// See [`CommandKind::AddSessionQos`].
    AddSessionQos(AddSessionQosArg),
    /// See [`CommandKind::DeleteSessionQos`].
    DeleteSessionQos(QosKeys),
    /// See [`CommandKind::Read`].
    Read(FlowMeasureReadArg),
}

impl CommandArg {
    /// The command this argument belongs to.
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::AddPdr(_) => CommandKind::AddPdr,
            Self::DeletePdr(_) => CommandKind::DeletePdr,
            Self::AddFar(_) => CommandKind::AddFar,
            Self::DeleteFar(_) => CommandKind::DeleteFar,
            Self::AddAppQos(_) => CommandKind::AddAppQos,
            Self::DeleteAppQos(_) => CommandKind::DeleteAppQos,
            Self::AddSessionQos(_) => CommandKind::AddSessionQos,
            Self::DeleteSessionQos(_) => CommandKind::DeleteSessionQos,
            Self::Read(_) => CommandKind::Read,
        }
    }

    fn pack_body(&self, dst: &mut BytesMut) {
        match self {
            Self::AddPdr(arg) => {
                dst.put_u32(arg.priority);
                arg.keys.pack(dst);
                arg.masks.pack(dst);
                arg.values.pack(dst);
            }
            Self::DeletePdr(arg) => {
                arg.keys.pack(dst);
                arg.masks.pack(dst);
            }
            Self::AddFar(arg) => {
                arg.keys.pack(dst);
                arg.values.pack(dst);
            }
            Self::AddAppQos(arg) => {
                arg.keys.pack(dst);
                arg.qos.pack(dst);
                dst.put_u8(arg.qfi);
            }
            Self::AddSessionQos(arg) => {
                arg.keys.pack(dst);
                arg.qos.pack(dst);
            }
            Self::DeleteFar(keys) => keys.pack(dst),
            Self::DeleteAppQos(keys) | Self::DeleteSessionQos(keys) => keys.pack(dst),
            Self::Read(arg) => arg.pack(dst),
        }
    }

    fn unpack_body(kind: CommandKind, src: &mut Bytes) -> Result<Self, Error> {
        let arg = match kind {
            CommandKind::AddPdr => Self::AddPdr(AddPdrArg {
                priority: get_u32(src)?,
                keys: PdrKeys::unpack(src)?,
                masks: PdrKeys::unpack(src)?,
                values: PdrValues::unpack(src)?,
            }),
            CommandKind::DeletePdr => Self::DeletePdr(DeletePdrArg {
                keys: PdrKeys::unpack(src)?,
                masks: PdrKeys::unpack(src)?,
            }),
            CommandKind::AddFar => Self::AddFar(AddFarArg {
                keys: FarKeys::unpack(src)?,
                values: FarValues::unpack(src)?,
            }),
            CommandKind::DeleteFar => Self::DeleteFar(FarKeys::unpack(src)?),
            CommandKind::AddAppQos => Self::AddAppQos(AddAppQosArg {
                keys: QosKeys::unpack(src)?,
                qos: QosValues::unpack(src)?,
                qfi: get_u8(src)?,
            }),
            CommandKind::DeleteAppQos => Self::DeleteAppQos(QosKeys::unpack(src)?),
            CommandKind::AddSessionQos => Self::AddSessionQos(AddSessionQosArg {
                keys: QosKeys::unpack(src)?,
                qos: QosValues::unpack(src)?,
            }),
            CommandKind::DeleteSessionQos => Self::DeleteSessionQos(QosKeys::unpack(src)?),
            CommandKind::Read => Self::Read(FlowMeasureReadArg::unpack(src)?),
        };

        Ok(arg)
    }
}

/// A command addressed to a named module of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Target module name.
    pub name: String,
    /// Command argument.
    pub arg: CommandArg,
}

impl CommandRequest {
    /// A command for the module `name`.
    pub fn new(name: impl Into<String>, arg: CommandArg) -> Self {
        Self { name: name.into(), arg }
    }

    /// The command this request carries.
    pub const fn kind(&self) -> CommandKind {
        self.arg.kind()
    }
}

/// A request on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A command for a module.
    Module(CommandRequest),
    /// Counters of the named port.
    PortStats {
        /// Port name.
        name: String,
    },
}

impl Pack for Request {
    fn pack(&self, dst: &mut BytesMut) {
        match self {
            Self::Module(request) => {
                dst.put_u8(REQUEST_MODULE);
                put_str(dst, &request.name);
                put_str(dst, request.kind().as_str());
                request.arg.pack_body(dst);
            }
            Self::PortStats { name } => {
                dst.put_u8(REQUEST_PORT_STATS);
                put_str(dst, name);
            }
        }
    }
}

impl Unpack for Request {
    fn unpack(src: &mut Bytes) -> Result<Self, Error> {
        match get_u8(src)? {
            REQUEST_MODULE => {
                let name = get_str(src)?;
                let cmd = get_str(src)?;
                let kind = CommandKind::parse(&cmd).ok_or(Error::UnknownCommand(cmd))?;
                let arg = CommandArg::unpack_body(kind, src)?;

                Ok(Self::Module(CommandRequest { name, arg }))
            }
            REQUEST_PORT_STATS => Ok(Self::PortStats { name: get_str(src)? }),
            tag => Err(Error::UnknownTag { what: "request", tag }),
        }
    }
}
