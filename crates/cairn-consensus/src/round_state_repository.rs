use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::round_state::RoundState;
use crate::validator_set::ValidatorSet;

/// Owner of every live round state, keyed by `(height, round)`
pub struct RoundStateRepository {
    validator_set: Arc<dyn ValidatorSet>,
    round_states: Mutex<HashMap<(u64, u32), Arc<RoundState>>>,
}

impl RoundStateRepository {
    pub fn new(validator_set: Arc<dyn ValidatorSet>) -> Self {
        RoundStateRepository {
            validator_set,
            round_states: Mutex::new(HashMap::new()),
        }
    }

    /// Get the round state for `(height, round)`, creating it on first use
    pub fn get_round_state(&self, height: u64, round: u32) -> Arc<RoundState> {
        self.round_states
            .lock()
            .entry((height, round))
            .or_insert_with(|| {
                Arc::new(RoundState::new(
                    height,
                    round,
                    self.validator_set.round_validators(height),
                    self.validator_set.proposer_index(height, round),
                ))
            })
            .clone()
    }

    /// All round states ordered by height, then round
    pub fn round_states(&self) -> Vec<Arc<RoundState>> {
        let mut round_states: Vec<_> = self.round_states.lock().values().cloned().collect();
        round_states.sort_by_key(|rs| (rs.height(), rs.round()));
        round_states
    }

    pub fn len(&self) -> usize {
        self.round_states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.round_states.lock().is_empty()
    }

    pub fn clear(&self) {
        self.round_states.lock().clear();
    }
}
