//! Interactive access to project containers.
//!
//! Two paths lead into a container: a TTY shell attached through the
//! container runtime, and a reverse proxy to the terminal server the agent
//! image runs on its own port.

pub mod error;
pub mod frame;
pub mod shell;
pub mod terminal;

pub use {
    error::{ConsoleError, Error, Result},
    frame::Frame,
    shell::{DEFAULT_SHELL, SessionEnd, SessionSummary, attach, pump},
    terminal::{
        ProxyRequest, ProxyResponse, TerminalProxy, Upstream, connect_upstream, pump_upstream,
        websocket_url,
    },
};
