//! Desired-state configuration for the in-container agent.
//!
//! The agent validates its structural document strictly and deletes anything
//! it does not recognize, credentials included. [`split()`] therefore
//! materializes two files: a sanitized structural document and a separate
//! secret store. [`merge()`] rebuilds the logical document for read paths.

pub mod bootstrap;
pub mod document;
pub mod error;
pub mod paths;
pub mod provider;
pub mod split;
pub mod validate;

pub use {
    bootstrap::{BootstrapEnv, bootstrap_env},
    document::{
        AgentDefaults, AgentsSection, AuthProfile, AuthSection, ChannelAccount, ChannelConfig,
        ChannelPolicy, ConfigDocument, GatewaySection, ModelSelection, ProfileMode,
    },
    error::{ReconcileError, Result},
    provider::Provider,
    split::{
        SecretProfile, SecretStore, SplitConfig, StructuralAuth, StructuralDocument,
        StructuralProfile, merge, split,
    },
    validate::{MIN_TOKEN_LEN, validate},
};
