use super::ProxyFamily;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// State of one `(request, family)` grant within a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    Absent,
    /// `prepare` was attempted. Resources may exist, fully or partially.
    Prepared,
    Finalized,
    Released,
}

impl GrantState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Prepared => "prepared",
            Self::Finalized => "finalized",
            Self::Released => "released",
        }
    }

    fn can_move_to(self, next: GrantState) -> bool {
        matches!(
            (self, next),
            (Self::Absent, Self::Prepared)
                | (Self::Prepared, Self::Finalized | Self::Released)
                // A second package manager of the same family re-prepares
                | (Self::Finalized, Self::Prepared | Self::Released)
        )
    }
}

/// Grant states of one request's pipeline run.
///
/// The ledger is what guarantees release on every exit path: whatever is
/// still held when the chain stops is listed by [`held`](Self::held).
#[derive(Debug, Clone, Default)]
pub struct GrantLedger {
    request_id: u64,
    states: BTreeMap<ProxyFamily, GrantState>,
}

impl GrantLedger {
    #[must_use]
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            states: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn state(&self, family: ProxyFamily) -> GrantState {
        self.states
            .get(&family)
            .copied()
            .unwrap_or(GrantState::Absent)
    }

    /// Record a transition, rejecting moves the lifecycle does not allow.
    pub fn advance(&mut self, family: ProxyFamily, next: GrantState) -> Result<()> {
        let current = self.state(family);
        if !current.can_move_to(next) {
            return Err(Error::proxy(format!(
                "The {family} proxy grant of request {} cannot move from {} to {}",
                self.request_id,
                current.as_str(),
                next.as_str()
            )));
        }
        self.states.insert(family, next);
        Ok(())
    }

    /// Families whose grant reached `prepared` and was not released yet.
    #[must_use]
    pub fn held(&self) -> Vec<ProxyFamily> {
        self.states
            .iter()
            .filter(|(_, state)| matches!(state, GrantState::Prepared | GrantState::Finalized))
            .map(|(family, _)| *family)
            .collect()
    }
}
