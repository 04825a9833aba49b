//! Per-session bookkeeping of installed rules.
//!
//! A [`Session`] records every rule the engine accepted and removes all of them when
//! the session ends, whatever the workload in between did. Use [`Session::scope`] or
//! [`with_session`] so the teardown cannot be skipped.

use std::{collections::VecDeque, net::SocketAddr, panic::AssertUnwindSafe};

use futures::{future::BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use upf_transport::{ClientTransport, Tcp};
use upf_wire::{CommandKind, Response};

use crate::{
    client::{CallOptions, ClientOptions, ControlClient},
    error::{ClientError, RemoteRuleError},
    rules::{Far, Pdr, Qer, Rule},
};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting and recording rules.
    Active,
    /// Removing recorded rules.
    Cleaning,
}

/// Rules installed by a session, in installation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRules {
    /// Installed PDRs.
    pub pdrs: Vec<Pdr>,
    /// Installed FARs.
    pub fars: Vec<Far>,
    /// Installed application QERs, both directions each.
    pub app_qers: Vec<Qer>,
    /// Installed session QERs, both directions each.
    pub session_qers: Vec<Qer>,
}

impl SessionRules {
    /// Number of recorded rules.
    pub fn len(&self) -> usize {
        self.pdrs.len() + self.fars.len() + self.app_qers.len() + self.session_qers.len()
    }

    /// Returns `true` if no rule is recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the rules in removal order: PDRs, FARs, application QERs, session QERs.
    fn drain(&mut self) -> Vec<Rule> {
        let mut rules = Vec::with_capacity(self.len());
        rules.extend(self.pdrs.drain(..).map(Rule::Pdr));
        rules.extend(self.fars.drain(..).map(Rule::Far));
        rules.extend(self.app_qers.drain(..).map(Rule::AppQer));
        rules.extend(self.session_qers.drain(..).map(Rule::SessionQer));
        rules
    }
}

/// Outcome of a session teardown.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Rules the engine confirmed removed.
    pub removed: usize,
    /// Rules whose removal failed, with the reason.
    pub failures: Vec<(Rule, ClientError)>,
}

impl CleanupReport {
    /// Removals attempted, successful or not.
    pub fn attempted(&self) -> usize {
        self.removed + self.failures.len()
    }

    /// Returns `true` if every removal succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Records the rules installed through it and removes them when it ends.
///
/// Teardown runs on every exit path. A [`scope`](Session::scope) that returns, fails
/// or panics cleans up before it resolves. A scope that is cancelled, or a session
/// dropped with rules still recorded, hands the removals to a task on the current
/// Tokio runtime.
pub struct Session<T: ClientTransport = Tcp> {
    client: ControlClient<T>,
    rules: SessionRules,
    /// Rules taken out of `rules` for removal and not yet removed.
    teardown: VecDeque<Rule>,
    state: SessionState,
}

impl Session<Tcp> {
    /// Connects a TCP client to the engine at `addr` and opens a session on it.
    pub async fn start(addr: SocketAddr, options: ClientOptions) -> Result<Self, ClientError> {
        Ok(Self::new(ControlClient::connect_to(addr, options).await?))
    }
}

impl<T: ClientTransport> Session<T> {
    /// Opens a session on a connected client.
    pub fn new(client: ControlClient<T>) -> Self {
        Self {
            client,
            rules: SessionRules::default(),
            teardown: VecDeque::new(),
            state: SessionState::Active,
        }
    }

    /// The client the session installs through. Rules installed on it directly
    /// are not recorded.
    pub fn client(&self) -> &ControlClient<T> {
        &self.client
    }

    /// Rules recorded so far, in installation order.
    pub fn rules(&self) -> &SessionRules {
        &self.rules
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Installs `pdr` and records it if the engine accepted it.
    pub async fn add_pdr(&mut self, pdr: Pdr) -> Result<Response, ClientError> {
        let response = self.client.add_pdr(&pdr).await?;
        if response.is_ok() {
            self.rules.pdrs.push(pdr);
        }
        Ok(response)
    }

    /// Installs `far` and records it if the engine accepted it.
    pub async fn add_far(&mut self, far: Far) -> Result<Response, ClientError> {
        let response = self.client.add_far(&far).await?;
        if response.is_ok() {
            self.rules.fars.push(far);
        }
        Ok(response)
    }

    /// Installs both directions of an application QER.
    pub async fn add_app_qer(&mut self, qer: Qer) -> Result<Response, ClientError> {
        self.add_qer(CommandKind::AddAppQos, qer).await
    }

    /// Installs both directions of a session QER.
    pub async fn add_session_qer(&mut self, qer: Qer) -> Result<Response, ClientError> {
        self.add_qer(CommandKind::AddSessionQos, qer).await
    }

    /// Installs and records any kind of rule.
    pub async fn install(&mut self, rule: Rule) -> Result<Response, ClientError> {
        match rule {
            Rule::Pdr(pdr) => self.add_pdr(pdr).await,
            Rule::Far(far) => self.add_far(far).await,
            Rule::AppQer(qer) => self.add_app_qer(qer).await,
            Rule::SessionQer(qer) => self.add_session_qer(qer).await,
        }
    }

    /// A QER is recorded as soon as one direction is accepted, so teardown also
    /// removes a half-installed policer.
    async fn add_qer(&mut self, kind: CommandKind, qer: Qer) -> Result<Response, ClientError> {
        let (uplink, downlink) =
            self.client.qer_directions(kind, &qer, CallOptions::default()).await;

        let accepted = |r: &Result<Response, ClientError>| r.as_ref().is_ok_and(Response::is_ok);
        if accepted(&uplink) || accepted(&downlink) {
            match kind {
                CommandKind::AddAppQos => self.rules.app_qers.push(qer),
                _ => self.rules.session_qers.push(qer),
            }
        }

        ControlClient::<T>::combine(kind, &qer, uplink, downlink)
    }

    /// Removes every recorded rule. Failures are logged and do not stop the
    /// remaining removals; the rule lists are empty afterwards either way.
    ///
    /// If the returned future is dropped early, the rules not yet removed stay
    /// queued and are removed by the next cleanup, or in the background once the
    /// session is dropped.
    pub async fn cleanup(&mut self) -> CleanupReport {
        self.state = SessionState::Cleaning;
        self.teardown.extend(self.rules.drain());

        let mut report = CleanupReport::default();
        while let Some(rule) = self.teardown.front().cloned() {
            match remove_rule(&self.client, &rule).await {
                Ok(()) => report.removed += 1,
                Err(e) => report.failures.push((rule, e)),
            }
            self.teardown.pop_front();
        }

        if report.attempted() > 0 {
            info!(removed = report.removed, failed = report.failures.len(), "session cleaned up");
        }
        self.state = SessionState::Active;

        report
    }

    /// Hands every rule still recorded or queued to a background removal task.
    fn detach_cleanup(&mut self) {
        self.teardown.extend(self.rules.drain());
        self.state = SessionState::Active;
        if self.teardown.is_empty() {
            return;
        }

        let rules: Vec<Rule> = self.teardown.drain(..).collect();
        let Ok(handle) = Handle::try_current() else {
            warn!(rules = rules.len(), "no runtime to clean up on, rules are left in the engine");
            return;
        };

        debug!(rules = rules.len(), "removing rules in the background");
        let client = self.client.clone();
        handle.spawn(async move {
            let mut removed = 0;
            let attempted = rules.len();
            for rule in rules {
                if remove_rule(&client, &rule).await.is_ok() {
                    removed += 1;
                }
            }
            info!(removed, failed = attempted - removed, "session cleaned up in the background");
        });
    }

    /// Runs `workload` and then removes every rule the session recorded, on success,
    /// on error and on panic. A panic is resumed once the cleanup is done. If the
    /// returned future is dropped before it resolves, the removals continue in the
    /// background.
    pub async fn scope<R, E, F>(&mut self, workload: F) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut Session<T>) -> BoxFuture<'a, Result<R, E>>,
    {
        let mut guard = ScopeGuard(self);
        let outcome = AssertUnwindSafe(workload(&mut *guard.0)).catch_unwind().await;

        let report = guard.0.cleanup().await;
        if !report.is_clean() {
            warn!(failures = report.failures.len(), "session left rules behind");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Removes every recorded rule and closes the channel.
    pub async fn end(mut self) -> CleanupReport {
        let report = self.cleanup().await;
        self.client.close();
        debug!("session ended");
        report
    }
}

impl<T: ClientTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if !self.rules.is_empty() || !self.teardown.is_empty() {
            warn!(rules = self.rules.len() + self.teardown.len(), "session dropped without cleanup");
            self.detach_cleanup();
        }
    }
}

/// Detaches the session's pending removals if a scope is dropped before it resolves.
struct ScopeGuard<'a, T: ClientTransport>(&'a mut Session<T>);

impl<T: ClientTransport> Drop for ScopeGuard<'_, T> {
    fn drop(&mut self) {
        self.0.detach_cleanup();
    }
}

/// Removes one rule. A response with a non-zero code counts as a failure even
/// in lenient mode.
async fn remove_rule<T: ClientTransport>(client: &ControlClient<T>, rule: &Rule) -> Result<(), ClientError> {
    let outcome = match client.remove(rule).await {
        Ok(response) if response.is_ok() => return Ok(()),
        Ok(response) => RemoteRuleError {
            command: removal_command(rule).to_string(),
            target: rule.to_string(),
            code: response.error.code,
            message: response.error.errmsg,
        }
        .into(),
        Err(e) => e,
    };

    warn!(%rule, "failed to remove rule: {outcome}");
    Err(outcome)
}

/// Opens a session on the engine at `addr`, runs `workload` in its scope and ends it.
pub async fn with_session<R, E, F>(addr: SocketAddr, options: ClientOptions, workload: F) -> Result<R, E>
where
    F: for<'a> FnOnce(&'a mut Session<Tcp>) -> BoxFuture<'a, Result<R, E>>,
    E: From<ClientError>,
{
    let mut session = Session::start(addr, options).await?;
    let result = session.scope(workload).await;
    session.end().await;

    result
}

const fn removal_command(rule: &Rule) -> CommandKind {
    match rule {
        Rule::Pdr(_) => CommandKind::DeletePdr,
        Rule::Far(_) => CommandKind::DeleteFar,
        Rule::AppQer(_) => CommandKind::DeleteAppQos,
        Rule::SessionQer(_) => CommandKind::DeleteSessionQos,
    }
}
