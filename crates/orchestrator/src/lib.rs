//! Project orchestration: container launch, post-start provisioning,
//! configuration updates and control actions.
//!
//! [`ProjectService`] is the entry point. It validates intent, persists the
//! project with its sealed [`DurableConfig`], and hands container work to
//! [`Provisioner`], which runs the slow part on supervised background tasks.

pub mod blueprint;
pub mod durable;
pub mod error;
pub mod locks;
pub mod provision;
pub mod service;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    blueprint::OrchestratorSettings,
    durable::DurableConfig,
    error::{Error, Result},
    locks::ProjectLocks,
    provision::{PostStart, Provisioner},
    service::{
        ConfigSource, ConfigView, CreateProject, CredentialInput, Launched, ProjectService,
        UpdateOutcome, UpdateRequest,
    },
    update::{Applied, UpdateTier},
};
