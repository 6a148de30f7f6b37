//! Container engine abstraction.
//!
//! [`RuntimeDriver`] is the only surface the rest of the control plane uses to
//! touch containers. [`docker::DockerRuntime`] talks to the engine API,
//! [`memory::InMemoryRuntime`] is a scriptable stand-in for tests.

pub mod docker;
pub mod driver;
pub mod error;
pub mod memory;
pub mod resources;
pub mod types;

pub use {
    driver::RuntimeDriver,
    error::{Result, RuntimeError},
    resources::ResourceSpec,
    types::{
        ContainerInfo, ContainerRef, ContainerSpec, ContainerState, ExecOpts, ExecResult,
        ExecSession, FileSpec, RawStats, VolumeMount,
    },
};
