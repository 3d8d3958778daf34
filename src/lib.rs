//! display output control without a windowing server
//!
//! a [`session`] grants the kms device, [`Core`] enumerates an output on it,
//! allocates scanout [`buffer`]s and drives [`commit`]s whose completions are
//! drained through [`event`].

pub mod backend;
pub mod buffer;
pub mod commit;
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod event;
pub mod input;
pub mod props;
pub mod session;
pub mod topology;
pub mod utils;

pub use crate::core::{Core, OutputId};
pub use error::{Error, Result};

#[cfg(test)]
mod testing;
