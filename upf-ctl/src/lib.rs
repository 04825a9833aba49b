#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Control-plane client for a UPF data-plane engine.
//!
//! Rules are described with the value types in [`rules`], turned into commands by
//! [`ControlClient`] and tracked per test session by [`Session`], which removes
//! everything it installed when the session ends. [`RateConverter`] derives the
//! token-bucket parameters of QoS enforcement rules and [`StatsReader`] reads the
//! engine's flow measurement modules.

mod client;
mod error;
pub mod qos;
pub mod rules;
mod session;
mod stats;

pub use client::{CallOptions, ClientOptions, ControlClient, DEFAULT_MODULE, DEFAULT_PORT_SUFFIX};
pub use error::{ClientError, DirectionalError, RemoteRuleError};
pub use qos::{Direction, QosRates, RateConverter, TokenBucket, TokenBuckets};
pub use rules::{Far, FarAction, Pdr, Qer, Rule, RuleError};
pub use session::{with_session, CleanupReport, Session, SessionRules, SessionState};
pub use stats::{
    SessionStatistics, Statistics, StatsReader, DEFAULT_PERCENTILES, POST_DL_QOS_MODULE,
    POST_UL_QOS_MODULE, PRE_QOS_MODULE,
};

pub use upf_socket::ReqError;
pub use upf_transport::{Tcp, TcpOptions};
pub use upf_wire::{PortStats, Response};
