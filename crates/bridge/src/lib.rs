//! Client for the bridge: a small HTTP agent inside each workload container.
//!
//! [`BridgeTransport`] reaches it through every candidate address with
//! bounded retries, then falls back to running a command inside the
//! container. [`ConfigBridge`] is the typed surface the orchestrator uses.

pub mod client;
pub mod command;
pub mod endpoint;
pub mod error;
pub mod transport;

pub use {
    client::{ConfigBridge, ConfigSnapshot},
    command::{CLI_BIN, CliCommand, CommandOutput, extract_json},
    endpoint::candidate_urls,
    error::{BridgeError, Result},
    transport::{BridgeRequest, BridgeTarget, BridgeTransport, CallKind},
};
