use crate::pkg_managers::PackageManagerKind;
use crate::request::Request;
use std::fmt;

/// One unit of a request's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Materialize the application source at the exact revision.
    FetchSource,
    /// Resolve and fetch one package manager's dependencies. With
    /// `auto_detect`, a source tree without the lock file skips the stage
    /// instead of failing it.
    FetchDeps {
        kind: PackageManagerKind,
        auto_detect: bool,
    },
    AssembleArchive,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchSource => f.write_str("fetch-source"),
            Self::FetchDeps { kind, .. } => write!(f, "fetch-{kind}-deps"),
            Self::AssembleArchive => f.write_str("assemble-archive"),
        }
    }
}

/// The ordered stages for `request`.
///
/// Package managers run in submission order. An empty list tries every
/// supported package manager in auto-detect mode.
#[must_use]
pub fn build_chain(request: &Request) -> Vec<Stage> {
    let auto_detect = request.auto_detect();
    let kinds: &[PackageManagerKind] = if auto_detect {
        &PackageManagerKind::ALL
    } else {
        &request.pkg_managers
    };

    let mut chain = Vec::with_capacity(kinds.len() + 2);
    chain.push(Stage::FetchSource);
    chain.extend(
        kinds
            .iter()
            .map(|&kind| Stage::FetchDeps { kind, auto_detect }),
    );
    chain.push(Stage::AssembleArchive);
    chain
}
