//! Conda-Env-Manager: conda process integration for envfix
//!
//! This crate is the boundary between the deterministic repair core and the
//! actual package manager. It renders environment manifests, shells out to
//! the `conda` binary with per-operation timeouts, and adapts failures into
//! the core's [`CreateResult`](envfix_core::CreateResult) contract.

pub mod error;
pub mod executor;

pub use error::{CondaError, Result};
pub use executor::CondaExecutor;
