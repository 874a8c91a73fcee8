#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for depbundle.
//!
//! Pure helpers with no logging/tracing dependencies. Logging is owned by
//! the CLI crate and the engine in `depbundle-core`.

pub mod fs;
pub mod hash;
