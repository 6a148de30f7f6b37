//! Shared error definitions and small utilities used across all kennel crates.

pub mod error;
pub mod redact;
pub mod supervisor;
pub mod time;

pub use {
    error::{Error, FromMessage, KennelError, Result},
    redact::{mask_secret, scrub_secrets},
    supervisor::{TaskHandle, TaskOutcome, spawn_supervised},
};
