use std::{net::SocketAddr, time::Duration};

use tracing::{debug, warn};

use upf_socket::{ReqError, ReqOptions, ReqSocket};
use upf_transport::{ClientTransport, Tcp};
use upf_wire::{
    CommandArg, CommandKind, CommandRequest, FlowMeasureReadArg, Pack, Payload, PortStats,
    Request, Response, Unpack,
};

use crate::{
    error::{ClientError, DirectionalError, RemoteRuleError},
    qos::{Direction, RateConverter},
    rules::{Far, Pdr, Qer, Rule},
    stats::StatsReader,
};

/// Module owning the rule tables of the engine.
pub const DEFAULT_MODULE: &str = "upfeBPF";
/// Ports of the engine are named after their interface with this suffix.
pub const DEFAULT_PORT_SUFFIX: &str = "Fast";

/// Configuration of a [`ControlClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Target module of rule commands.
    pub module: String,
    /// Default deadline of a call.
    pub timeout: Duration,
    /// Turn non-zero engine codes into [`ClientError::Remote`].
    pub strict: bool,
    /// Smallest burst size of an installed policer, in bytes.
    pub min_burst_size: u64,
    /// Appended to an interface name to form its port name.
    pub port_suffix: String,
    /// Bound on requests in flight over the channel.
    pub max_in_flight: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            timeout: Duration::from_secs(5),
            strict: true,
            min_burst_size: RateConverter::DEFAULT_MIN_BURST_SIZE,
            port_suffix: DEFAULT_PORT_SUFFIX.to_string(),
            max_in_flight: 64,
        }
    }
}

impl ClientOptions {
    /// Sets the module receiving rule commands.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Sets the default call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether non-zero engine codes are errors.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sets the smallest policer burst size.
    pub fn min_burst_size(mut self, min_burst_size: u64) -> Self {
        self.min_burst_size = min_burst_size;
        self
    }

    /// Sets the port name suffix.
    pub fn port_suffix(mut self, port_suffix: impl Into<String>) -> Self {
        self.port_suffix = port_suffix.into();
        self
    }

    /// Sets the bound on requests in flight.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

/// Per-call overrides of [`ClientOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Deadline of this call.
    pub timeout: Option<Duration>,
    /// Whether a non-zero engine code is an error for this call.
    pub strict: Option<bool>,
}

impl CallOptions {
    /// Overrides the deadline.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides strictness.
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }
}

/// Issues rule commands to the engine and unwraps its responses.
///
/// Every call waits for its response or its deadline. Nothing is retried: a failed
/// call is returned to the caller as is.
pub struct ControlClient<T: ClientTransport = Tcp> {
    socket: ReqSocket<T>,
    options: ClientOptions,
    converter: RateConverter,
}

impl<T: ClientTransport> Clone for ControlClient<T> {
    /// The clone shares the channel and its in-flight bound.
    fn clone(&self) -> Self {
        Self { socket: self.socket.clone(), options: self.options.clone(), converter: self.converter }
    }
}

impl ControlClient<Tcp> {
    /// A TCP client, not yet connected.
    pub fn new(options: ClientOptions) -> Self {
        Self::with_transport(Tcp::new(), options)
    }

    /// Creates a TCP client and connects it to the engine at `addr`.
    pub async fn connect_to(addr: SocketAddr, options: ClientOptions) -> Result<Self, ClientError> {
        let mut client = Self::new(options);
        client.connect(addr).await?;
        Ok(client)
    }
}

impl<T: ClientTransport> ControlClient<T> {
    /// A client over `transport`, not yet connected.
    pub fn with_transport(transport: T, options: ClientOptions) -> Self {
        let socket = ReqSocket::with_options(
            transport,
            ReqOptions::default()
                .timeout(options.timeout)
                .max_active_requests(options.max_in_flight),
        );
        let converter = RateConverter::new().with_min_burst_size(options.min_burst_size);

        Self { socket, options, converter }
    }

    /// Opens the channel to the engine.
    pub async fn connect(&mut self, addr: SocketAddr) -> Result<(), ClientError> {
        self.socket.connect(addr).await.map_err(ClientError::Transport)?;
        debug!(%addr, module = %self.options.module, "connected to engine");
        Ok(())
    }

    /// Drops the channel. Later calls fail with a transport error.
    pub fn close(&mut self) {
        self.socket.close();
    }

    /// Returns `true` while the channel is open.
    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// The options the client was created with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The converter sizing QER policers.
    pub fn converter(&self) -> &RateConverter {
        &self.converter
    }

    /// Reader of the engine's measurement modules.
    pub fn stats(&self) -> StatsReader<'_, T> {
        StatsReader::new(self)
    }

    /// Installs `pdr`.
    pub async fn add_pdr(&self, pdr: &Pdr) -> Result<Response, ClientError> {
        self.pdr(CommandKind::AddPdr, pdr, CallOptions::default()).await
    }

    /// Removes `pdr`, matched on its keys and masks.
    pub async fn delete_pdr(&self, pdr: &Pdr) -> Result<Response, ClientError> {
        self.pdr(CommandKind::DeletePdr, pdr, CallOptions::default()).await
    }

    /// Installs `far`. An invalid action mask fails before anything is sent.
    pub async fn add_far(&self, far: &Far) -> Result<Response, ClientError> {
        self.far(CommandKind::AddFar, far, CallOptions::default()).await
    }

    /// Removes `far`.
    pub async fn delete_far(&self, far: &Far) -> Result<Response, ClientError> {
        self.far(CommandKind::DeleteFar, far, CallOptions::default()).await
    }

    /// Installs the uplink and downlink application policers of `qer`.
    pub async fn add_app_qer(&self, qer: &Qer) -> Result<Response, ClientError> {
        self.qer(CommandKind::AddAppQos, qer, CallOptions::default()).await
    }

    /// Removes the uplink and downlink application policers of `qer`.
    pub async fn delete_app_qer(&self, qer: &Qer) -> Result<Response, ClientError> {
        self.qer(CommandKind::DeleteAppQos, qer, CallOptions::default()).await
    }

    /// Installs the uplink and downlink session policers of `qer`.
    pub async fn add_session_qer(&self, qer: &Qer) -> Result<Response, ClientError> {
        self.qer(CommandKind::AddSessionQos, qer, CallOptions::default()).await
    }

    /// Removes the uplink and downlink session policers of `qer`.
    pub async fn delete_session_qer(&self, qer: &Qer) -> Result<Response, ClientError> {
        self.qer(CommandKind::DeleteSessionQos, qer, CallOptions::default()).await
    }

    /// Installs any kind of rule.
    pub async fn install(&self, rule: &Rule) -> Result<Response, ClientError> {
        self.install_with(rule, CallOptions::default()).await
    }

    /// Installs any kind of rule with per-call options.
    pub async fn install_with(&self, rule: &Rule, call: CallOptions) -> Result<Response, ClientError> {
        match rule {
            Rule::Pdr(pdr) => self.pdr(CommandKind::AddPdr, pdr, call).await,
            Rule::Far(far) => self.far(CommandKind::AddFar, far, call).await,
            Rule::AppQer(qer) => self.qer(CommandKind::AddAppQos, qer, call).await,
            Rule::SessionQer(qer) => self.qer(CommandKind::AddSessionQos, qer, call).await,
        }
    }

    /// Removes any kind of rule.
    pub async fn remove(&self, rule: &Rule) -> Result<Response, ClientError> {
        self.remove_with(rule, CallOptions::default()).await
    }

    /// Removes any kind of rule with per-call options.
    pub async fn remove_with(&self, rule: &Rule, call: CallOptions) -> Result<Response, ClientError> {
        match rule {
            Rule::Pdr(pdr) => self.pdr(CommandKind::DeletePdr, pdr, call).await,
            Rule::Far(far) => self.far(CommandKind::DeleteFar, far, call).await,
            Rule::AppQer(qer) => self.qer(CommandKind::DeleteAppQos, qer, call).await,
            Rule::SessionQer(qer) => self.qer(CommandKind::DeleteSessionQos, qer, call).await,
        }
    }

    /// Reads a flow measurement module. The raw response is returned; see
    /// [`StatsReader`] for the flattened statistics.
    pub async fn read(
        &self,
        module: &str,
        arg: FlowMeasureReadArg,
        call: CallOptions,
    ) -> Result<Response, ClientError> {
        let request = Request::Module(CommandRequest::new(module, CommandArg::Read(arg)));
        self.call(request, CommandKind::Read.as_str(), module, call).await
    }

    /// Counters of the port serving interface `ifname`.
    pub async fn port_stats(&self, ifname: &str) -> Result<PortStats, ClientError> {
        let name = format!("{ifname}{}", self.options.port_suffix);
        let request = Request::PortStats { name: name.clone() };

        let response = self.call(request, "port_stats", &name, CallOptions::default()).await?;
        match response.data {
            Some(Payload::PortStats(stats)) => Ok(stats),
            _ => Err(ClientError::UnexpectedPayload {
                command: "port_stats".to_string(),
                target: name,
                expected: "port statistics",
            }),
        }
    }

    async fn pdr(&self, kind: CommandKind, pdr: &Pdr, call: CallOptions) -> Result<Response, ClientError> {
        let arg = match kind {
            CommandKind::AddPdr => CommandArg::AddPdr(pdr.add_arg()),
            _ => CommandArg::DeletePdr(pdr.delete_arg()),
        };

        self.command(arg, &pdr.to_string(), call).await
    }

    async fn far(&self, kind: CommandKind, far: &Far, call: CallOptions) -> Result<Response, ClientError> {
        let arg = match kind {
            CommandKind::AddFar => CommandArg::AddFar(far.add_arg()?),
            _ => CommandArg::DeleteFar(far.keys()),
        };

        self.command(arg, &far.to_string(), call).await
    }

    /// Issues one command per direction. Both are attempted even if the first fails.
    async fn qer(&self, kind: CommandKind, qer: &Qer, call: CallOptions) -> Result<Response, ClientError> {
        let (uplink, downlink) = self.qer_directions(kind, qer, call).await;
        Self::combine(kind, qer, uplink, downlink)
    }

    pub(crate) async fn qer_directions(
        &self,
        kind: CommandKind,
        qer: &Qer,
        call: CallOptions,
    ) -> (Result<Response, ClientError>, Result<Response, ClientError>) {
        let uplink = self.qer_direction(kind, qer, Direction::Uplink, call).await;
        let downlink = self.qer_direction(kind, qer, Direction::Downlink, call).await;
        (uplink, downlink)
    }

    async fn qer_direction(
        &self,
        kind: CommandKind,
        qer: &Qer,
        direction: Direction,
        call: CallOptions,
    ) -> Result<Response, ClientError> {
        let bucket = self.converter.convert(&qer.rates()).get(direction);
        let arg = match kind {
            CommandKind::AddAppQos => CommandArg::AddAppQos(qer.app_add_arg(direction, bucket)),
            CommandKind::AddSessionQos => CommandArg::AddSessionQos(qer.session_add_arg(direction, bucket)),
            CommandKind::DeleteAppQos => CommandArg::DeleteAppQos(qer.keys(direction)),
            _ => CommandArg::DeleteSessionQos(qer.keys(direction)),
        };

        let outcome = self.command(arg, &format!("{qer} {direction}"), call).await;
        if let Err(ref e) = outcome {
            warn!(%kind, %direction, "{qer}: {e}");
        }

        outcome
    }

    /// Folds both directional outcomes into one. In lenient mode a single rejected
    /// direction is reported through the returned response; when both are rejected
    /// the two responses are returned in a [`DirectionalError`].
    pub(crate) fn combine(
        kind: CommandKind,
        qer: &Qer,
        uplink: Result<Response, ClientError>,
        downlink: Result<Response, ClientError>,
    ) -> Result<Response, ClientError> {
        match (uplink, downlink) {
            (Ok(uplink), Ok(downlink)) if uplink.is_ok() => Ok(downlink),
            (Ok(uplink), Ok(downlink)) if downlink.is_ok() => Ok(uplink),
            (uplink, downlink) => Err(DirectionalError {
                command: kind.to_string(),
                target: qer.to_string(),
                uplink,
                downlink,
            }
            .into()),
        }
    }

    async fn command(&self, arg: CommandArg, target: &str, call: CallOptions) -> Result<Response, ClientError> {
        let kind = arg.kind();
        let request = Request::Module(CommandRequest::new(self.options.module.clone(), arg));
        self.call(request, kind.as_str(), target, call).await
    }

    async fn call(
        &self,
        request: Request,
        command: &str,
        target: &str,
        call: CallOptions,
    ) -> Result<Response, ClientError> {
        let timeout = call.timeout.unwrap_or(self.options.timeout);
        let strict = call.strict.unwrap_or(self.options.strict);

        debug!(command, target, ?timeout, "sending command");

        let mut raw = match self.socket.request_with_timeout(request.to_bytes(), timeout).await {
            Ok(raw) => raw,
            Err(ReqError::Timeout) => {
                return Err(ClientError::Timeout {
                    command: command.to_string(),
                    target: target.to_string(),
                    timeout,
                })
            }
            Err(e) => return Err(ClientError::Transport(e)),
        };
        let response = Response::unpack(&mut raw)?;

        debug!(command, target, code = response.error.code, "received response");

        if strict && !response.is_ok() {
            return Err(RemoteRuleError {
                command: command.to_string(),
                target: target.to_string(),
                code: response.error.code,
                message: response.error.errmsg,
            }
            .into());
        }

        Ok(response)
    }
}
