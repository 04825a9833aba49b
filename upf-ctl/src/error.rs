use std::{fmt, time::Duration};

use thiserror::Error;
use upf_socket::ReqError;
use upf_wire::Response;

use crate::rules::RuleError;

/// The engine answered a command with a non-zero error code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{command} on {target} failed with code {code}: {message}")]
pub struct RemoteRuleError {
    /// Command string, e.g. `add_pdr`.
    pub command: String,
    /// The rule, module or port the command addressed.
    pub target: String,
    /// The engine's error code.
    pub code: i32,
    /// The engine's error message, verbatim.
    pub message: String,
}

/// Errors returned by [`ControlClient`](crate::ControlClient) and the types built on it.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The engine rejected the command.
    #[error(transparent)]
    Remote(#[from] RemoteRuleError),
    /// No response within the deadline. The command may or may not have been applied.
    #[error("{command} on {target} timed out after {timeout:?}")]
    Timeout {
        /// Command string.
        command: String,
        /// The rule, module or port the command addressed.
        target: String,
        /// The deadline that passed.
        timeout: Duration,
    },
    /// The channel to the engine failed.
    #[error("Transport error: {0}")]
    Transport(#[source] ReqError),
    /// The rule could not be encoded; nothing was sent.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// The response could not be decoded.
    #[error("Wire protocol error: {0}")]
    Wire(#[from] upf_wire::Error),
    /// The response lacked the payload the command expects.
    #[error("{command} on {target} returned no {expected} payload")]
    UnexpectedPayload {
        /// Command string.
        command: String,
        /// The rule, module or port the command addressed.
        target: String,
        /// Description of the missing payload.
        expected: &'static str,
    },
    /// At least one direction of a QER command failed.
    #[error(transparent)]
    Directional(Box<DirectionalError>),
}

impl ClientError {
    /// Returns `true` if the same call may succeed when issued again. Only timeouts and
    /// a full in-flight window qualify; the client itself never retries.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport(ReqError::TooManyRequests) => true,
            Self::Directional(err) => {
                err.rejections().next().is_none() && err.failures().all(ClientError::is_retriable)
            }
            _ => false,
        }
    }

    /// The engine's error code, if the engine answered.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Remote(err) => Some(err.code),
            Self::Directional(err) => err.codes().into_iter().flatten().next(),
            _ => None,
        }
    }

    /// Returns `true` if the channel to the engine is gone.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(ReqError::TooManyRequests) => false,
            Self::Transport(_) => true,
            Self::Directional(err) => err.failures().any(ClientError::is_transport),
            _ => false,
        }
    }
}

impl From<DirectionalError> for ClientError {
    fn from(err: DirectionalError) -> Self {
        Self::Directional(Box::new(err))
    }
}

/// At least one direction of a QER command failed. Both directions are always
/// attempted, and both outcomes are kept.
///
/// A direction either failed outright (`Err`) or, in lenient mode, was answered
/// with a non-zero code (`Ok` holding the rejecting response).
#[derive(Debug)]
pub struct DirectionalError {
    /// Command string, e.g. `add_app_qos`.
    pub command: String,
    /// The QER the command addressed.
    pub target: String,
    /// Outcome of the uplink command.
    pub uplink: Result<Response, ClientError>,
    /// Outcome of the downlink command.
    pub downlink: Result<Response, ClientError>,
}

impl DirectionalError {
    /// Directions that failed with an error.
    pub fn failures(&self) -> impl Iterator<Item = &ClientError> {
        [&self.uplink, &self.downlink].into_iter().filter_map(|r| r.as_ref().err())
    }

    /// Responses carrying a non-zero code, returned in lenient mode.
    pub fn rejections(&self) -> impl Iterator<Item = &Response> {
        [&self.uplink, &self.downlink]
            .into_iter()
            .filter_map(|r| r.as_ref().ok())
            .filter(|r| !r.is_ok())
    }

    /// The engine's code for the uplink and downlink command, where it answered
    /// with one.
    pub fn codes(&self) -> [Option<i32>; 2] {
        fn code(r: &Result<Response, ClientError>) -> Option<i32> {
            match r {
                Ok(response) if response.is_ok() => None,
                Ok(response) => Some(response.error.code),
                Err(e) => e.code(),
            }
        }

        [code(&self.uplink), code(&self.downlink)]
    }

    /// Returns `true` if the engine accepted at least one direction.
    pub fn partially_applied(&self) -> bool {
        [&self.uplink, &self.downlink].iter().any(|r| r.as_ref().is_ok_and(Response::is_ok))
    }
}

impl fmt::Display for DirectionalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn outcome(r: &Result<Response, ClientError>) -> String {
            match r {
                Ok(response) if response.is_ok() => "ok".to_string(),
                Ok(response) => format!("code {}: {}", response.error.code, response.error.errmsg),
                Err(e) => e.to_string(),
            }
        }

        write!(
            f,
            "{} on {} failed: uplink {}, downlink {}",
            self.command,
            self.target,
            outcome(&self.uplink),
            outcome(&self.downlink)
        )
    }
}

impl std::error::Error for DirectionalError {}
