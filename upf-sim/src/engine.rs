//! In-memory model of the data-plane engine's rule tables.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use upf_wire::{
    CommandArg, CommandKind, CommandRequest, FarKeys, FarValues, FlowMeasureStats, Histogram,
    Pack, Payload, PdrKeys, PdrValues, Percentile, PortStats, QosKeys, QosValues, Request,
    Response, Unpack,
};

/// No such entry, module or port.
pub const ENOENT: i32 = 2;
/// Malformed or rejected argument.
pub const EINVAL: i32 = 22;

/// Module owning the rule tables of a default engine.
pub const UPF_MODULE: &str = "upfeBPF";
/// Flow measurement modules of a default engine.
pub const MEASURE_MODULES: [&str; 3] =
    ["preQosFlowMeasure", "postDLQosFlowMeasure", "postULQosFlowMeasure"];
/// Ports of a default engine.
pub const PORTS: [&str; 2] = ["accessFast", "coreFast"];
/// Commands kept in the log of a default engine.
pub const DEFAULT_COMMAND_LOG_LIMIT: usize = 65_536;

/// Modules and ports an [`Engine`] serves.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the module that owns the rule tables.
    pub module: String,
    /// Flow measurement modules answering `read`.
    pub measure_modules: Vec<String>,
    /// Port names answering port statistics queries.
    pub ports: Vec<String>,
    /// Commands kept in the log. The oldest records are dropped beyond it.
    pub command_log_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module: UPF_MODULE.to_string(),
            measure_modules: MEASURE_MODULES.iter().map(|m| m.to_string()).collect(),
            ports: PORTS.iter().map(|p| p.to_string()).collect(),
            command_log_limit: DEFAULT_COMMAND_LOG_LIMIT,
        }
    }
}

/// Makes matching commands fail with `code`.
#[derive(Debug, Clone)]
pub struct Fault {
    /// Command the fault applies to.
    pub kind: CommandKind,
    /// Restricts a QoS fault to one direction.
    pub src_iface: Option<u8>,
    /// Error code answered instead of handling the command.
    pub code: i32,
    /// How many more times the fault fires. `None` fires forever.
    pub remaining: Option<usize>,
}

impl Fault {
    /// Fails the next command of `kind` once.
    pub const fn once(kind: CommandKind, code: i32) -> Self {
        Self { kind, src_iface: None, code, remaining: Some(1) }
    }

    /// Fails every command of `kind`.
    pub const fn always(kind: CommandKind, code: i32) -> Self {
        Self { kind, src_iface: None, code, remaining: None }
    }

    /// Restricts the fault to QoS commands keyed on `src_iface`.
    pub const fn on_iface(mut self, src_iface: u8) -> Self {
        self.src_iface = Some(src_iface);
        self
    }

    fn matches(&self, kind: CommandKind, src_iface: Option<u8>) -> bool {
        self.kind == kind && (self.src_iface.is_none() || self.src_iface == src_iface)
    }
}

/// A command as seen by the engine, with the code it answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// Target module.
    pub module: String,
    /// Command kind.
    pub kind: CommandKind,
    /// Code of the answer, 0 on success.
    pub code: i32,
}

/// An installed PDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdrEntry {
    /// Match priority, higher wins.
    pub priority: u32,
    /// Actions applied to matching packets.
    pub values: PdrValues,
}

/// An installed application policer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppQosEntry {
    /// Token bucket parameters.
    pub qos: QosValues,
    /// QoS flow identifier.
    pub qfi: u8,
}

#[derive(Debug, Default)]
struct Tables {
    pdrs: FxHashMap<(PdrKeys, PdrKeys), PdrEntry>,
    fars: FxHashMap<FarKeys, FarValues>,
    app_qos: FxHashMap<QosKeys, AppQosEntry>,
    session_qos: FxHashMap<QosKeys, QosValues>,
    measures: FxHashMap<String, FlowMeasureStats>,
    ports: FxHashMap<String, PortStats>,
    faults: Vec<Fault>,
    log: VecDeque<CommandRecord>,
    latency: Duration,
}

/// A simulated engine. Clones share the same tables.
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    tables: Arc<Mutex<Tables>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine serving the default modules and ports.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// An engine serving the modules and ports of `config`.
    pub fn with_config(config: EngineConfig) -> Self {
        let mut tables = Tables::default();
        for module in &config.measure_modules {
            tables.measures.insert(module.clone(), FlowMeasureStats::default());
        }
        for port in &config.ports {
            tables.ports.insert(port.clone(), PortStats::default());
        }

        Self { config: Arc::new(config), tables: Arc::new(Mutex::new(tables)) }
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decodes a raw request, handles it and encodes the response.
    pub fn handle_bytes(&self, mut raw: Bytes) -> Bytes {
        let response = match Request::unpack(&mut raw) {
            Ok(request) => self.handle(request),
            Err(e) => {
                tracing::warn!("Rejecting undecodable request: {}", e);
                Response::failure(EINVAL, e.to_string())
            }
        };

        response.to_bytes()
    }

    /// Handles a decoded request, applying injected faults first.
    pub fn handle(&self, request: Request) -> Response {
        let mut tables = self.tables.lock();

        match request {
            Request::PortStats { name } => match tables.ports.get(&name) {
                Some(stats) => Response::with_data(Payload::PortStats(*stats)),
                None => Response::failure(ENOENT, format!("port {name} not found")),
            },
            Request::Module(request) => {
                let kind = request.kind();
                let module = request.name.clone();
                let response = self.handle_command(&mut tables, request);
                tracing::debug!(%module, %kind, code = response.error.code, "handled command");
                if tables.log.len() >= self.config.command_log_limit {
                    tables.log.pop_front();
                }
                if self.config.command_log_limit > 0 {
                    tables.log.push_back(CommandRecord { module, kind, code: response.error.code });
                }

                response
            }
        }
    }

    fn handle_command(&self, tables: &mut Tables, request: CommandRequest) -> Response {
        let kind = request.kind();

        if let Some(code) = take_fault(tables, kind, qos_iface(&request.arg)) {
            return Response::failure(code, format!("injected fault on {kind}"));
        }

        if request.name != self.config.module {
            return match request.arg {
                CommandArg::Read(arg) => match tables.measures.get_mut(&request.name) {
                    Some(stats) => {
                        let snapshot = select_percentiles(stats, &arg.latency_percentiles, &arg.jitter_percentiles);
                        if arg.clear {
                            *stats = FlowMeasureStats::default();
                        }
                        Response::with_data(Payload::FlowMeasure(snapshot))
                    }
                    None => Response::failure(ENOENT, format!("no module named {}", request.name)),
                },
                _ if tables.measures.contains_key(&request.name) => {
                    Response::failure(EINVAL, format!("{} does not support {kind}", request.name))
                }
                _ => Response::failure(ENOENT, format!("no module named {}", request.name)),
            };
        }

        match request.arg {
            CommandArg::AddPdr(arg) => {
                tables.pdrs.insert(
                    (arg.keys, arg.masks),
                    PdrEntry { priority: arg.priority, values: arg.values },
                );
                Response::ok()
            }
            CommandArg::DeletePdr(arg) => match tables.pdrs.remove(&(arg.keys, arg.masks)) {
                Some(_) => Response::ok(),
                None => Response::failure(ENOENT, "pdr not found"),
            },
            CommandArg::AddFar(arg) => {
                tables.fars.insert(arg.keys, arg.values);
                Response::ok()
            }
            CommandArg::DeleteFar(keys) => match tables.fars.remove(&keys) {
                Some(_) => Response::ok(),
                None => Response::failure(ENOENT, "far not found"),
            },
            CommandArg::AddAppQos(arg) => match check_policer(&arg.qos) {
                Ok(()) => {
                    tables.app_qos.insert(arg.keys, AppQosEntry { qos: arg.qos, qfi: arg.qfi });
                    Response::ok()
                }
                Err(msg) => Response::failure(EINVAL, msg),
            },
            CommandArg::DeleteAppQos(keys) => match tables.app_qos.remove(&keys) {
                Some(_) => Response::ok(),
                None => Response::failure(ENOENT, "app qos not found"),
            },
            CommandArg::AddSessionQos(arg) => match check_policer(&arg.qos) {
                Ok(()) => {
                    tables.session_qos.insert(arg.keys, arg.qos);
                    Response::ok()
                }
                Err(msg) => Response::failure(EINVAL, msg),
            },
            CommandArg::DeleteSessionQos(keys) => match tables.session_qos.remove(&keys) {
                Some(_) => Response::ok(),
                None => Response::failure(ENOENT, "session qos not found"),
            },
            CommandArg::Read(_) => {
                Response::failure(EINVAL, format!("{} does not support read", request.name))
            }
        }
    }

    /// Arms `fault` for subsequent commands.
    pub fn inject_fault(&self, fault: Fault) {
        self.tables.lock().faults.push(fault);
    }

    /// Disarms every injected fault.
    pub fn clear_faults(&self) {
        self.tables.lock().faults.clear();
    }

    /// Sets the delay applied by the server before every response.
    pub fn set_latency(&self, latency: Duration) {
        self.tables.lock().latency = latency;
    }

    /// Delay applied by the server before every response.
    pub fn latency(&self) -> Duration {
        self.tables.lock().latency
    }

    /// Replaces the counters of flow measurement module `module`.
    pub fn set_measurement(&self, module: &str, stats: FlowMeasureStats) {
        self.tables.lock().measures.insert(module.to_string(), stats);
    }

    /// Replaces the counters of `port`.
    pub fn set_port_stats(&self, port: &str, stats: PortStats) {
        self.tables.lock().ports.insert(port.to_string(), stats);
    }

    /// The PDR installed under `keys` and `masks`, if any.
    pub fn pdr(&self, keys: &PdrKeys, masks: &PdrKeys) -> Option<PdrEntry> {
        self.tables.lock().pdrs.get(&(*keys, *masks)).copied()
    }

    /// The FAR installed under `keys`, if any.
    pub fn far(&self, keys: &FarKeys) -> Option<FarValues> {
        self.tables.lock().fars.get(keys).copied()
    }

    /// The application policer installed under `keys`, if any.
    pub fn app_qos(&self, keys: &QosKeys) -> Option<AppQosEntry> {
        self.tables.lock().app_qos.get(keys).copied()
    }

    /// The session policer installed under `keys`, if any.
    pub fn session_qos(&self, keys: &QosKeys) -> Option<QosValues> {
        self.tables.lock().session_qos.get(keys).copied()
    }

    /// Number of installed PDRs.
    pub fn pdr_count(&self) -> usize {
        self.tables.lock().pdrs.len()
    }

    /// Number of installed FARs.
    pub fn far_count(&self) -> usize {
        self.tables.lock().fars.len()
    }

    /// Number of installed application policers, one per direction.
    pub fn app_qos_count(&self) -> usize {
        self.tables.lock().app_qos.len()
    }

    /// Number of installed session policers, one per direction.
    pub fn session_qos_count(&self) -> usize {
        self.tables.lock().session_qos.len()
    }

    /// Returns `true` if no rule of any kind is installed.
    pub fn is_empty(&self) -> bool {
        let tables = self.tables.lock();
        tables.pdrs.is_empty()
            && tables.fars.is_empty()
            && tables.app_qos.is_empty()
            && tables.session_qos.is_empty()
    }

    /// The logged module commands, in arrival order. At most
    /// [`EngineConfig::command_log_limit`] of the latest are kept.
    pub fn commands(&self) -> Vec<CommandRecord> {
        self.tables.lock().log.iter().cloned().collect()
    }

    /// Empties the command log. Installed rules are kept.
    pub fn clear_commands(&self) {
        self.tables.lock().log.clear();
    }

    /// Number of logged commands of `kind`.
    pub fn count(&self, kind: CommandKind) -> usize {
        self.tables.lock().log.iter().filter(|r| r.kind == kind).count()
    }
}

fn qos_iface(arg: &CommandArg) -> Option<u8> {
    match arg {
        CommandArg::AddAppQos(arg) => Some(arg.keys.src_iface),
        CommandArg::AddSessionQos(arg) => Some(arg.keys.src_iface),
        CommandArg::DeleteAppQos(keys) | CommandArg::DeleteSessionQos(keys) => Some(keys.src_iface),
        _ => None,
    }
}

fn take_fault(tables: &mut Tables, kind: CommandKind, src_iface: Option<u8>) -> Option<i32> {
    let idx = tables.faults.iter().position(|f| f.matches(kind, src_iface))?;
    let fault = &mut tables.faults[idx];
    let code = fault.code;

    if let Some(remaining) = fault.remaining.as_mut() {
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            tables.faults.remove(idx);
        }
    }

    Some(code)
}

/// The engine refuses policers it cannot meter with.
fn check_policer(qos: &QosValues) -> Result<(), &'static str> {
    if qos.cir == 0 || qos.pir == 0 {
        return Err("zero-rate policer rejected");
    }
    if qos.pir < qos.cir {
        return Err("peak rate below committed rate");
    }
    if qos.cbs == 0 || qos.pbs == 0 || qos.ebs == 0 {
        return Err("zero burst size rejected");
    }

    Ok(())
}

fn select_percentiles(stats: &FlowMeasureStats, latency: &[u32], jitter: &[u32]) -> FlowMeasureStats {
    fn select(hist: &Histogram, wanted: &[u32]) -> Histogram {
        let percentiles = wanted
            .iter()
            .map(|p| Percentile {
                percentile: *p,
                value_ns: hist
                    .percentiles
                    .iter()
                    .find(|have| have.percentile == *p)
                    .map_or(0, |have| have.value_ns),
            })
            .collect();

        Histogram { percentiles, ..hist.clone() }
    }

    FlowMeasureStats {
        packets: stats.packets,
        bytes: stats.bytes,
        latency: select(&stats.latency, latency),
        jitter: select(&stats.jitter, jitter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upf_wire::{AddAppQosArg, AddPdrArg, DeletePdrArg, FlowMeasureReadArg};

    fn module(arg: CommandArg) -> Request {
        Request::Module(CommandRequest::new(UPF_MODULE, arg))
    }

    #[test]
    fn pdr_delete_needs_matching_masks() {
        let engine = Engine::new();
        let keys = PdrKeys { src_iface: 2, dst_ip: 0x1000_0001, ..Default::default() };
        let masks = PdrKeys { src_iface: 0xff, dst_ip: u32::MAX, ..Default::default() };

        let add = AddPdrArg { priority: 1, keys, masks, values: PdrValues::default() };
        assert!(engine.handle(module(CommandArg::AddPdr(add))).is_ok());

        let wrong = DeletePdrArg { keys, masks: PdrKeys::default() };
        assert_eq!(engine.handle(module(CommandArg::DeletePdr(wrong))).error.code, ENOENT);
        assert_eq!(engine.pdr_count(), 1);

        let right = DeletePdrArg { keys, masks };
        assert!(engine.handle(module(CommandArg::DeletePdr(right))).is_ok());
        assert!(engine.is_empty());
    }

    #[test]
    fn zero_rate_policer_is_rejected() {
        let engine = Engine::new();
        let arg = AddAppQosArg {
            keys: QosKeys { src_iface: 1, qer_id: 1, fse_id: 1 },
            qos: QosValues { cir: 0, pir: 0, cbs: 1, pbs: 1, ebs: 1 },
            qfi: 9,
        };

        let response = engine.handle(module(CommandArg::AddAppQos(arg)));
        assert_eq!(response.error.code, EINVAL);
        assert_eq!(engine.app_qos_count(), 0);
    }

    #[test]
    fn directional_fault_only_hits_its_interface() {
        let engine = Engine::new();
        engine.inject_fault(Fault::always(CommandKind::AddSessionQos, 5).on_iface(2));

        let qos = QosValues { cir: 1, pir: 1, cbs: 1, pbs: 1, ebs: 1 };
        let up = upf_wire::AddSessionQosArg { keys: QosKeys { src_iface: 1, qer_id: 1, fse_id: 1 }, qos };
        let down = upf_wire::AddSessionQosArg { keys: QosKeys { src_iface: 2, ..up.keys }, qos };

        assert!(engine.handle(module(CommandArg::AddSessionQos(up))).is_ok());
        assert_eq!(engine.handle(module(CommandArg::AddSessionQos(down))).error.code, 5);
        assert_eq!(engine.session_qos_count(), 1);
    }

    #[test]
    fn one_shot_fault_fires_once() {
        let engine = Engine::new();
        engine.inject_fault(Fault::once(CommandKind::DeleteFar, 7));

        let keys = FarKeys { far_id: 1, fse_id: 1 };
        assert_eq!(engine.handle(module(CommandArg::DeleteFar(keys))).error.code, 7);
        assert_eq!(engine.handle(module(CommandArg::DeleteFar(keys))).error.code, ENOENT);
    }

    #[test]
    fn clearing_read_resets_counters() {
        let engine = Engine::new();
        engine.set_measurement(
            "preQosFlowMeasure",
            FlowMeasureStats {
                packets: 5,
                bytes: 320,
                latency: Histogram {
                    percentiles: vec![Percentile { percentile: 50, value_ns: 900 }],
                    ..Default::default()
                },
                jitter: Histogram::default(),
            },
        );

        let read = |clear| {
            engine.handle(Request::Module(CommandRequest::new(
                "preQosFlowMeasure",
                CommandArg::Read(FlowMeasureReadArg::new(clear, &[50, 99])),
            )))
        };

        match read(true).data {
            Some(Payload::FlowMeasure(stats)) => {
                assert_eq!(stats.packets, 5);
                assert_eq!(
                    stats.latency.percentiles,
                    vec![
                        Percentile { percentile: 50, value_ns: 900 },
                        Percentile { percentile: 99, value_ns: 0 }
                    ]
                );
            }
            other => panic!("unexpected payload {other:?}"),
        }

        match read(false).data {
            Some(Payload::FlowMeasure(stats)) => assert_eq!(stats.packets, 0),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn unknown_module_and_port() {
        let engine = Engine::new();
        let response = engine.handle(Request::Module(CommandRequest::new(
            "nope",
            CommandArg::DeleteFar(FarKeys::default()),
        )));
        assert_eq!(response.error.code, ENOENT);

        let response = engine.handle(Request::PortStats { name: "n3Fast".into() });
        assert_eq!(response.error.code, ENOENT);
        assert_eq!(engine.commands().len(), 1);
    }

    #[test]
    fn command_log_is_bounded() {
        let engine = Engine::with_config(EngineConfig { command_log_limit: 3, ..Default::default() });
        for far_id in 0..5 {
            let keys = FarKeys { far_id, fse_id: 1 };
            engine.handle(module(CommandArg::DeleteFar(keys)));
        }
        engine.handle(module(CommandArg::AddFar(upf_wire::AddFarArg {
            keys: FarKeys { far_id: 9, fse_id: 1 },
            values: FarValues::default(),
        })));

        let kinds: Vec<CommandKind> = engine.commands().into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![CommandKind::DeleteFar, CommandKind::DeleteFar, CommandKind::AddFar]);
        assert_eq!(engine.count(CommandKind::AddFar), 1);

        engine.clear_commands();
        assert!(engine.commands().is_empty());
        assert_eq!(engine.far_count(), 1);
    }
}
