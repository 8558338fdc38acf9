use std::sync::Arc;

use cairn_storage::{ConsensusStore, Storage, StorageError};
use tracing::info;

use crate::error::ConsensusError;
use crate::round_state::RoundState;
use crate::round_state_repository::RoundStateRepository;
use crate::state::{ConsensusState, StateData};

/// Rebuilds round states and the consensus state from durable storage
pub struct Bootstrapper<'a, S: Storage> {
    repository: &'a RoundStateRepository,
    store: &'a ConsensusStore<S>,
}

impl<'a, S: Storage> Bootstrapper<'a, S> {
    pub fn new(repository: &'a RoundStateRepository, store: &'a ConsensusStore<S>) -> Self {
        Bootstrapper { repository, store }
    }

    /// Replay stored messages into the repository and return the stored
    /// state, or `None` on first boot.
    pub fn run(&self) -> Result<Option<ConsensusState>, ConsensusError> {
        let proposals = self.store.get_proposals()?;
        info!("Consensus bootstrap - proposals: {}", proposals.len());
        for proposal in proposals {
            self.repository
                .get_round_state(proposal.height, proposal.round)
                .add_proposal(proposal);
        }

        let prevotes = self.store.get_prevotes()?;
        info!("Consensus bootstrap - prevotes: {}", prevotes.len());
        for prevote in prevotes {
            self.repository
                .get_round_state(prevote.height, prevote.round)
                .add_prevote(prevote);
        }

        let precommits = self.store.get_precommits()?;
        info!("Consensus bootstrap - precommits: {}", precommits.len());
        for precommit in precommits {
            self.repository
                .get_round_state(precommit.height, precommit.round)
                .add_precommit(precommit);
        }

        let state: Option<StateData> = self.store.get_state()?;
        Ok(state.map(|state| state.resolve(self.repository)))
    }
}

/// Write the consensus state and every round-state message, replacing
/// whatever was stored before.
pub fn persist<S: Storage>(
    store: &mut ConsensusStore<S>,
    state: &StateData,
    repository: &RoundStateRepository,
) -> Result<(), ConsensusError> {
    let round_states = repository.round_states();

    store.clear();
    let written = stage(store, state, &round_states).and_then(|()| store.commit());
    if let Err(e) = written {
        store.rollback();
        return Err(e.into());
    }

    info!(
        height = state.height,
        round = state.round,
        round_states = round_states.len(),
        "Persisted consensus state"
    );
    Ok(())
}

fn stage<S: Storage>(
    store: &mut ConsensusStore<S>,
    state: &StateData,
    round_states: &[Arc<RoundState>],
) -> Result<(), StorageError> {
    store.save_state(state)?;
    for round_state in round_states {
        if let Some(proposal) = round_state.proposal() {
            store.save_proposals(&[proposal])?;
        }
        store.save_prevotes(&round_state.prevotes())?;
        store.save_precommits(&round_state.precommits())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Step;
    use crate::validator_set::StaticValidatorSet;
    use cairn_core::{Block, KeyPair, Precommit, Prevote, Proposal};
    use cairn_storage::MemoryStorage;

    fn repository(keys: &[KeyPair]) -> RoundStateRepository {
        RoundStateRepository::new(Arc::new(StaticValidatorSet::new(
            keys.iter().map(|k| k.public).collect(),
        )))
    }

    #[test]
    fn test_first_boot_has_no_state() {
        let keys: Vec<_> = (1..=4).map(KeyPair::from_seed).collect();
        let repo = repository(&keys);
        let store = ConsensusStore::new(MemoryStorage::new());

        assert!(Bootstrapper::new(&repo, &store).run().unwrap().is_none());
        assert!(repo.is_empty());
    }

    #[test]
    fn test_restart_reproduces_round_states() {
        let keys: Vec<_> = (1..=4).map(KeyPair::from_seed).collect();
        let repo = repository(&keys);
        let mut block = Block::genesis(1, 0);
        block.header.height = 3;
        let hash = block.hash();

        let r0 = repo.get_round_state(3, 0);
        r0.add_proposal(Proposal::new_signed(0, None, block, None, 3, &keys[3].secret).unwrap());
        for i in 0..4u32 {
            let key = &keys[i as usize].secret;
            r0.add_prevote(Prevote::new_signed(3, 0, Some(hash), i, key).unwrap());
            if i < 3 {
                r0.add_precommit(Precommit::new_signed(3, 0, Some(hash), i, key).unwrap());
            }
        }
        let r1 = repo.get_round_state(3, 1);
        r1.add_prevote(Prevote::new_signed(3, 1, None, 0, &keys[0].secret).unwrap());

        let state = StateData {
            height: 3,
            round: 1,
            step: Step::Prevote,
            locked_round: Some(0),
            valid_round: Some(0),
        };
        let mut store = ConsensusStore::new(MemoryStorage::new());
        persist(&mut store, &state, &repo).unwrap();

        let restored_repo = repository(&keys);
        let restored = Bootstrapper::new(&restored_repo, &store)
            .run()
            .unwrap()
            .unwrap();

        assert_eq!(restored.data(), state);
        let locked = restored.locked_value.unwrap();
        assert!(Arc::ptr_eq(&locked, &restored_repo.get_round_state(3, 0)));
        assert!(Arc::ptr_eq(
            &locked,
            restored.valid_value.as_ref().unwrap()
        ));

        for (before, after) in repo.round_states().iter().zip(restored_repo.round_states()) {
            assert_eq!((before.height(), before.round()), (after.height(), after.round()));
            assert_eq!(before.has_majority_precommits(), after.has_majority_precommits());
            assert_eq!(before.has_majority_prevotes(), after.has_majority_prevotes());
            assert_eq!(before.prevotes(), after.prevotes());
            assert_eq!(before.proposal(), after.proposal());
        }
        assert_eq!(restored_repo.len(), 2);
        assert!(restored_repo.get_round_state(3, 0).has_majority_precommits_for(&hash));
        assert!(!restored_repo.get_round_state(3, 1).has_majority_precommits());
    }

    /// Memory store whose commit can be made to fail
    #[derive(Default)]
    struct FailingCommit {
        inner: MemoryStorage,
        fail: bool,
    }

    impl Storage for FailingCommit {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.inner.get(key)
        }

        fn put(&mut self, key: &[u8], value: &[u8]) {
            self.inner.put(key, value)
        }

        fn delete(&mut self, key: &[u8]) {
            self.inner.delete(key)
        }

        fn commit(&mut self) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Serialization("disk full".into()));
            }
            self.inner.commit()
        }

        fn rollback(&mut self) {
            self.inner.rollback()
        }

        fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
            self.inner.keys_with_prefix(prefix)
        }
    }

    #[test]
    fn test_failed_persist_leaves_previous_snapshot() {
        let keys: Vec<_> = (1..=4).map(KeyPair::from_seed).collect();
        let repo = repository(&keys);
        repo.get_round_state(2, 0)
            .add_prevote(Prevote::new_signed(2, 0, None, 0, &keys[0].secret).unwrap());

        let first = StateData {
            height: 2,
            round: 0,
            step: Step::Prevote,
            locked_round: None,
            valid_round: None,
        };
        let mut store = ConsensusStore::new(FailingCommit::default());
        persist(&mut store, &first, &repo).unwrap();

        let second = StateData {
            round: 1,
            step: Step::Precommit,
            ..first.clone()
        };
        store.storage_mut().fail = true;
        assert!(persist(&mut store, &second, &repo).is_err());

        // Nothing from the failed attempt may be left staged
        store.storage_mut().fail = false;
        store.commit().unwrap();

        let stored: StateData = store.get_state().unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(store.get_prevotes().unwrap().len(), 1);
    }
}
