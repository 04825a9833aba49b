//! A simulated UPF data-plane engine.
//!
//! The [`Engine`] keeps the PDR, FAR and QoS tables in memory and answers the same
//! requests a real engine would. [`SimServer`] exposes it over a reply socket so
//! control clients can be tested end to end, including failure and latency injection.

pub mod engine;
mod server;

pub use engine::{
    AppQosEntry, CommandRecord, Engine, EngineConfig, Fault, PdrEntry, EINVAL, ENOENT,
    MEASURE_MODULES, PORTS, UPF_MODULE,
};
pub use server::SimServer;
