//! Shared infrastructure for the agentry workspace: the host error
//! taxonomy and poison-tolerant lock helpers.

pub mod error;
pub mod sync;

pub use {
    error::HostError,
    sync::{MutexExt, RwLockExt},
};
