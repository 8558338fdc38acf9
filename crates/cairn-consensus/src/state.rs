use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::round_state::RoundState;
use crate::round_state_repository::RoundStateRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Propose,
    Prevote,
    Precommit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Propose => write!(f, "propose"),
            Step::Prevote => write!(f, "prevote"),
            Step::Precommit => write!(f, "precommit"),
        }
    }
}

/// Plain snapshot of the consensus state. This is what gets published to
/// processors and event sinks and what is persisted on shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateData {
    pub height: u64,
    pub round: u32,
    pub step: Step,
    pub locked_round: Option<u32>,
    pub valid_round: Option<u32>,
}

impl StateData {
    pub fn new(height: u64) -> Self {
        StateData {
            height,
            round: 0,
            step: Step::Propose,
            locked_round: None,
            valid_round: None,
        }
    }

    /// Re-link the locked and valid rounds to the round states held by
    /// `repository`.
    pub fn resolve(self, repository: &RoundStateRepository) -> ConsensusState {
        let valid_value = self
            .valid_round
            .map(|round| repository.get_round_state(self.height, round));
        let locked_value = self
            .locked_round
            .map(|round| repository.get_round_state(self.height, round));

        ConsensusState {
            height: self.height,
            round: self.round,
            step: self.step,
            locked_value,
            valid_value,
        }
    }
}

/// Live consensus state. Locked and valid values are shared references into
/// the round state repository, never copies.
#[derive(Debug, Clone)]
pub struct ConsensusState {
    pub height: u64,
    pub round: u32,
    pub step: Step,
    pub locked_value: Option<Arc<RoundState>>,
    pub valid_value: Option<Arc<RoundState>>,
}

impl ConsensusState {
    pub fn new(height: u64) -> Self {
        ConsensusState {
            height,
            round: 0,
            step: Step::Propose,
            locked_value: None,
            valid_value: None,
        }
    }

    pub fn locked_round(&self) -> Option<u32> {
        self.locked_value.as_ref().map(|rs| rs.round())
    }

    pub fn valid_round(&self) -> Option<u32> {
        self.valid_value.as_ref().map(|rs| rs.round())
    }

    pub fn data(&self) -> StateData {
        StateData {
            height: self.height,
            round: self.round,
            step: self.step,
            locked_round: self.locked_round(),
            valid_round: self.valid_round(),
        }
    }
}
