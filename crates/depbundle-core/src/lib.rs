#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Request orchestration and dependency canonicalization engine.
//!
//! A request names a repository, an exact revision and the package managers
//! to fetch dependencies for. [`Pipeline`] drives it through its stage chain:
//! fetch the source, then per package manager provision a proxy grant, run
//! the ecosystem resolver and record its output, and finally assemble a
//! deterministic archive.

pub mod archive;
pub mod canonical;
pub mod config;
pub mod content_manifest;
pub mod error;
pub mod packages;
pub mod paths;
pub mod pipeline;
pub mod pkg_managers;
pub mod proxy;
pub mod request;
pub mod resolver;
pub mod source;
pub mod store;
pub mod version;
pub mod worker;

pub use canonical::{
    canonical_packages, deep_sort, sort_packages_and_deps, unique_adjacent, UniqueAdjacentExt,
};
pub use config::Config;
pub use error::{Error, Result};
pub use packages::{Dependency, Package, PackageInfo, PackageType, PackagesData};
pub use pipeline::{build_chain, Pipeline, Stage};
pub use pkg_managers::{PackageManager, PackageManagerKind};
pub use proxy::{ProxyClient, ProxyFamily, ProxyLifecycle};
pub use request::{Request, RequestState, RequestSubmission};
pub use store::{FileStore, RequestStore};
pub use version::VERSION;
pub use worker::WorkerPool;
