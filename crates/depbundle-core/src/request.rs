//! Request records and their state machine.
//!
//! ```text
//! initiated ──▶ in_progress ──▶ complete
//!                  │  ▲    └──▶ failed
//!                  └──┘ (new reason)
//! ```
//!
//! `complete` and `failed` are terminal: once reached, a request is
//! immutable.

use crate::error::{Error, Result};
use crate::packages::{Dependency, PackageInfo};
use crate::pkg_managers::PackageManagerKind;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Reason recorded on a newly submitted request.
pub const INITIATED_REASON: &str = "The request was initiated";

/// Reason recorded when the whole chain succeeded.
pub const COMPLETED_REASON: &str = "Completed successfully";

/// Length of a full git commit hash.
pub const REF_LENGTH: usize = 40;

const REQUIRED_KEYS: &[&str] = &["pkg_managers", "ref", "repo"];
const ALLOWED_KEYS: &[&str] = &["pkg_managers", "ref", "repo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Initiated,
    InProgress,
    Complete,
    Failed,
}

impl RequestState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether a request in this state may move to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: RequestState) -> bool {
        match self {
            Self::Initiated => matches!(next, Self::InProgress | Self::Failed),
            Self::InProgress => next != Self::Initiated,
            Self::Complete | Self::Failed => false,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generated client configuration attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Destination path relative to the archive root, e.g. `app/.npmrc`.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ConfigFileKind,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFileKind {
    Base64,
}

impl ConfigFile {
    /// A config file whose content is stored base64 encoded.
    #[must_use]
    pub fn base64(path: impl Into<String>, content: &[u8]) -> Self {
        Self {
            path: path.into(),
            kind: ConfigFileKind::Base64,
            content: STANDARD.encode(content),
        }
    }

    /// Decode the stored content.
    pub fn decoded(&self) -> Result<Vec<u8>> {
        STANDARD.decode(&self.content).map_err(|e| {
            Error::validation(format!("The config file {} is not valid base64: {e}", self.path))
        })
    }
}

/// An environment variable downstream builds must set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub value: String,
    pub kind: EnvVarKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvVarKind {
    /// A path relative to the extracted archive root.
    Path,
    Literal,
}

impl EnvVar {
    #[must_use]
    pub fn path(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: EnvVarKind::Path,
        }
    }

    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: EnvVarKind::Literal,
        }
    }
}

/// Location and digest of a finished bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    /// BLAKE3 of the archive bytes.
    pub digest: String,
}

/// Validated client input for a new request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSubmission {
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Empty means every supported package manager is auto-detected.
    #[serde(default)]
    pub pkg_managers: Vec<PackageManagerKind>,
}

impl RequestSubmission {
    /// Validate a raw JSON submission.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(Error::validation("The request body must be a JSON object"));
        };

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !object.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "Missing required parameter(s): {}",
                missing.join(", ")
            )));
        }

        let invalid: BTreeSet<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|key| !ALLOWED_KEYS.contains(key))
            .collect();
        if !invalid.is_empty() {
            return Err(Error::validation(format!(
                "Got invalid keyword argument(s): {}",
                invalid.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let repo = match object.get("repo").and_then(|v| v.as_str()) {
            Some(repo) if !repo.trim().is_empty() => repo.to_string(),
            _ => {
                return Err(Error::validation(
                    "The \"repo\" parameter must be a non-empty string",
                ))
            }
        };

        let git_ref = match object.get("ref").and_then(|v| v.as_str()) {
            Some(git_ref) if is_full_hash(git_ref) => git_ref.to_string(),
            _ => {
                return Err(Error::validation(format!(
                    "The \"ref\" parameter must be a {REF_LENGTH} character hex string"
                )))
            }
        };

        // An empty list opts into auto-detection
        let pkg_managers = match object.get("pkg_managers") {
            Some(value) => parse_pkg_managers(value)?,
            None => Vec::new(),
        };

        Ok(Self {
            repo,
            git_ref,
            pkg_managers,
        })
    }
}

fn is_full_hash(s: &str) -> bool {
    s.len() == REF_LENGTH && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_pkg_managers(value: &serde_json::Value) -> Result<Vec<PackageManagerKind>> {
    let not_a_list =
        || Error::validation("The \"pkg_managers\" value must be an array of strings");

    let names = value
        .as_array()
        .ok_or_else(not_a_list)?
        .iter()
        .map(|v| v.as_str().ok_or_else(not_a_list))
        .collect::<Result<Vec<_>>>()?;

    let unsupported: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| PackageManagerKind::parse(name).is_none())
        .collect();
    if !unsupported.is_empty() {
        return Err(Error::validation(format!(
            "The following package managers are not supported: {}",
            unsupported.join(", ")
        )));
    }

    let mut seen = BTreeSet::new();
    let mut kinds = Vec::with_capacity(names.len());
    let mut repeated = BTreeSet::new();
    for kind in names.iter().filter_map(|name| PackageManagerKind::parse(name)) {
        if seen.insert(kind) {
            kinds.push(kind);
        } else {
            repeated.insert(kind.as_str());
        }
    }
    if !repeated.is_empty() {
        return Err(Error::validation(format!(
            "The following package managers were specified more than once: {}",
            repeated.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    Ok(kinds)
}

/// One resolution job and everything attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub pkg_managers: Vec<PackageManagerKind>,
    pub state: RequestState,
    pub state_reason: String,
    /// RFC 3339 timestamps.
    pub created: String,
    pub updated: String,
    #[serde(default)]
    pub config_files: Vec<ConfigFile>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, EnvVar>,
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveInfo>,
}

impl Request {
    /// A freshly submitted request in the `initiated` state.
    #[must_use]
    pub fn new(id: u64, submission: RequestSubmission) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            repo: submission.repo,
            git_ref: submission.git_ref,
            pkg_managers: submission.pkg_managers,
            state: RequestState::Initiated,
            state_reason: INITIATED_REASON.to_string(),
            created: now.clone(),
            updated: now,
            config_files: Vec::new(),
            environment_variables: BTreeMap::new(),
            packages: Vec::new(),
            dependencies: Vec::new(),
            archive: None,
        }
    }

    /// Move to `state` with a new reason.
    pub fn transition(&mut self, state: RequestState, reason: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(state) {
            return Err(Error::InvalidTransition {
                id: self.id,
                from: self.state.as_str(),
                to: state.as_str(),
            });
        }
        self.state = state;
        self.state_reason = reason.into();
        self.touch();
        Ok(())
    }

    /// Fail unless the request can still be mutated.
    pub fn ensure_mutable(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::InvalidTransition {
                id: self.id,
                from: self.state.as_str(),
                to: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Whether package managers are auto-detected instead of required.
    #[must_use]
    pub fn auto_detect(&self) -> bool {
        self.pkg_managers.is_empty()
    }

    pub(crate) fn touch(&mut self) {
        self.updated = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REF: &str = "c50b93a32df1c9d700e3e80996845bc2e13be848";

    fn submission() -> RequestSubmission {
        RequestSubmission::from_json(&json!({
            "repo": "https://github.com/release-engineering/retrodep.git",
            "ref": REF,
            "pkg_managers": ["gomod"],
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_submission() {
        let sub = submission();
        assert_eq!(sub.git_ref, REF);
        assert_eq!(sub.pkg_managers, vec![PackageManagerKind::Gomod]);
    }

    #[test]
    fn test_empty_pkg_managers_means_auto_detect() {
        let sub = RequestSubmission::from_json(&json!({
            "repo": "r", "ref": REF, "pkg_managers": []
        }))
        .unwrap();
        assert!(sub.pkg_managers.is_empty());
    }

    #[test]
    fn test_missing_keys() {
        let cases = [
            (json!({}), "Missing required parameter(s): pkg_managers, ref, repo"),
            (
                json!({"ref": REF, "pkg_managers": []}),
                "Missing required parameter(s): repo",
            ),
            (
                json!({"repo": "r", "pkg_managers": []}),
                "Missing required parameter(s): ref",
            ),
            (
                json!({"repo": "r", "ref": REF}),
                "Missing required parameter(s): pkg_managers",
            ),
        ];
        for (payload, expected) in cases {
            let err = RequestSubmission::from_json(&payload).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_null_pkg_managers_rejected() {
        let err = RequestSubmission::from_json(&json!({
            "repo": "r", "ref": REF, "pkg_managers": null
        }))
        .unwrap_err();
        assert!(err.to_string().contains("must be an array of strings"));
    }

    #[test]
    fn test_unknown_keys() {
        let err = RequestSubmission::from_json(&json!({
            "repo": "r", "ref": REF, "pkg_managers": [], "spam": 1, "eggs": 2
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Got invalid keyword argument(s): eggs, spam");
        assert!(err.to_string().contains("invalid keyword argument"));
    }

    #[test]
    fn test_bad_ref() {
        let almost = format!("{}zz", &REF[..38]);
        for bad in ["master", "c50b93a", almost.as_str()] {
            let err =
                RequestSubmission::from_json(&json!({"repo": "r", "ref": bad, "pkg_managers": []}))
                    .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad}");
            assert!(err.to_string().contains("40 character hex string"));
        }
    }

    #[test]
    fn test_unsupported_pkg_manager() {
        let err = RequestSubmission::from_json(&json!({
            "repo": "r", "ref": REF, "pkg_managers": ["npm", "cargo", "maven"]
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The following package managers are not supported: cargo, maven"
        );
    }

    #[test]
    fn test_duplicate_pkg_manager() {
        let err = RequestSubmission::from_json(&json!({
            "repo": "r", "ref": REF, "pkg_managers": ["npm", "gomod", "npm"]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("more than once: npm"));
    }

    #[test]
    fn test_pkg_managers_must_be_strings() {
        let err = RequestSubmission::from_json(&json!({
            "repo": "r", "ref": REF, "pkg_managers": "npm"
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_new_request_is_initiated() {
        let request = Request::new(1, submission());
        assert_eq!(request.state, RequestState::Initiated);
        assert_eq!(request.state_reason, INITIATED_REASON);
        assert!(!request.auto_detect());
    }

    #[test]
    fn test_in_progress_reentered() {
        let mut request = Request::new(1, submission());
        request
            .transition(RequestState::InProgress, "Fetching the application source")
            .unwrap();
        request
            .transition(RequestState::InProgress, "Fetching the gomod dependencies")
            .unwrap();
        assert_eq!(request.state_reason, "Fetching the gomod dependencies");
        request
            .transition(RequestState::Complete, COMPLETED_REASON)
            .unwrap();
        assert_eq!(request.state, RequestState::Complete);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut request = Request::new(1, submission());
        request.transition(RequestState::Failed, "boom").unwrap();

        for next in [
            RequestState::Initiated,
            RequestState::InProgress,
            RequestState::Complete,
            RequestState::Failed,
        ] {
            let err = request.transition(next, "again").unwrap_err();
            assert!(matches!(err, Error::InvalidTransition { .. }));
        }
        assert_eq!(request.state_reason, "boom");
        assert!(request.ensure_mutable().is_err());
    }

    #[test]
    fn test_cannot_go_back_to_initiated() {
        assert!(!RequestState::InProgress.can_transition_to(RequestState::Initiated));
        assert!(!RequestState::Initiated.can_transition_to(RequestState::Complete));
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&RequestState::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_config_file_base64() {
        let file = ConfigFile::base64("app/.npmrc", b"registry=http://x/\n");
        assert_eq!(file.decoded().unwrap(), b"registry=http://x/\n");
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["type"], "base64");
        assert_eq!(value["path"], "app/.npmrc");
    }
}
