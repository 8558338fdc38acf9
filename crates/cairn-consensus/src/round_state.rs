//! Per-(height, round) message ledger.
//!
//! Height, round and the validator set are fixed at construction. The
//! proposal and vote maps only ever grow: a second message for an index that
//! already voted is refused, and a conflicting one is kept as evidence.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use cairn_core::{
    is_majority, is_minority, AggregatedSignature, Block, Commit, CommitProof, Hash, Precommit,
    Prevote, Proposal, Sig, Validator,
};
use parking_lot::RwLock;
use tracing::debug;

use crate::aggregator;
use crate::block_processor::{BlockProcessorResult, ProcessableUnit};
use crate::error::ConsensusError;

/// Two signed, conflicting votes from the same validator in one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Equivocation {
    Prevote { first: Prevote, second: Prevote },
    Precommit { first: Precommit, second: Precommit },
}

/// Votes of one phase with a running tally per block hash
#[derive(Debug)]
struct VoteTally<V> {
    votes: BTreeMap<u32, V>,
    counts: HashMap<Option<Hash>, usize>,
}

impl<V> Default for VoteTally<V> {
    fn default() -> Self {
        VoteTally {
            votes: BTreeMap::new(),
            counts: HashMap::new(),
        }
    }
}

impl<V> VoteTally<V> {
    fn count(&self, block_hash: Option<Hash>) -> usize {
        self.counts.get(&block_hash).copied().unwrap_or(0)
    }

    /// The non-nil hash with the most votes. Ties resolve to the smaller hash.
    fn leading_hash(&self) -> Option<(Hash, usize)> {
        self.counts
            .iter()
            .filter_map(|(hash, count)| hash.map(|h| (h, *count)))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
    }

    fn signed(&self, total: usize) -> Vec<bool> {
        let mut signed = vec![false; total];
        for index in self.votes.keys() {
            if let Some(bit) = signed.get_mut(*index as usize) {
                *bit = true;
            }
        }
        signed
    }
}

#[derive(Debug, Default)]
struct Ledger {
    proposal: Option<Proposal>,
    processor_result: Option<BlockProcessorResult>,
    prevotes: VoteTally<Prevote>,
    precommits: VoteTally<Precommit>,
    evidence: Vec<Equivocation>,
    commit: Option<Commit>,
}

pub struct RoundState {
    height: u64,
    round: u32,
    validators: Vec<Validator>,
    proposer_index: u32,
    ledger: RwLock<Ledger>,
}

impl RoundState {
    pub fn new(height: u64, round: u32, validators: Vec<Validator>, proposer_index: u32) -> Self {
        RoundState {
            height,
            round,
            validators,
            proposer_index,
            ledger: RwLock::new(Ledger::default()),
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn proposer(&self) -> Option<&Validator> {
        self.validators.get(self.proposer_index as usize)
    }

    pub fn proposer_index(&self) -> u32 {
        self.proposer_index
    }

    pub fn has_proposal(&self) -> bool {
        self.ledger.read().proposal.is_some()
    }

    /// Record the round's proposal. Returns `false` if one is already present.
    pub fn add_proposal(&self, proposal: Proposal) -> bool {
        let mut ledger = self.ledger.write();
        if ledger.proposal.is_some() {
            return false;
        }
        ledger.proposal = Some(proposal);
        true
    }

    pub fn proposal(&self) -> Option<Proposal> {
        self.ledger.read().proposal.clone()
    }

    pub fn proposal_block_hash(&self) -> Option<Hash> {
        self.ledger.read().proposal.as_ref().map(|p| p.block_hash())
    }

    pub fn has_prevote(&self, validator_index: u32) -> bool {
        self.ledger.read().prevotes.votes.contains_key(&validator_index)
    }

    /// Record a prevote. Returns `false` if the validator already prevoted.
    pub fn add_prevote(&self, prevote: Prevote) -> bool {
        let mut ledger = self.ledger.write();
        if let Some(first) = ledger.prevotes.votes.get(&prevote.validator_index) {
            if first.block_hash != prevote.block_hash {
                debug!(
                    height = self.height,
                    round = self.round,
                    validator = prevote.validator_index,
                    "Conflicting prevote recorded as evidence"
                );
                let first = first.clone();
                ledger.evidence.push(Equivocation::Prevote {
                    first,
                    second: prevote,
                });
            }
            return false;
        }

        *ledger.prevotes.counts.entry(prevote.block_hash).or_default() += 1;
        ledger.prevotes.votes.insert(prevote.validator_index, prevote);
        true
    }

    pub fn has_precommit(&self, validator_index: u32) -> bool {
        self.ledger.read().precommits.votes.contains_key(&validator_index)
    }

    /// Record a precommit. Returns `false` if the validator already precommitted.
    pub fn add_precommit(&self, precommit: Precommit) -> bool {
        let mut ledger = self.ledger.write();
        if let Some(first) = ledger.precommits.votes.get(&precommit.validator_index) {
            if first.block_hash != precommit.block_hash {
                debug!(
                    height = self.height,
                    round = self.round,
                    validator = precommit.validator_index,
                    "Conflicting precommit recorded as evidence"
                );
                let first = first.clone();
                ledger.evidence.push(Equivocation::Precommit {
                    first,
                    second: precommit,
                });
            }
            return false;
        }

        *ledger.precommits.counts.entry(precommit.block_hash).or_default() += 1;
        ledger.precommits.votes.insert(precommit.validator_index, precommit);
        true
    }

    pub fn prevote(&self, validator_index: u32) -> Option<Prevote> {
        self.ledger.read().prevotes.votes.get(&validator_index).cloned()
    }

    pub fn precommit(&self, validator_index: u32) -> Option<Precommit> {
        self.ledger.read().precommits.votes.get(&validator_index).cloned()
    }

    /// Prevotes ordered by validator index
    pub fn prevotes(&self) -> Vec<Prevote> {
        self.ledger.read().prevotes.votes.values().cloned().collect()
    }

    /// Precommits ordered by validator index
    pub fn precommits(&self) -> Vec<Precommit> {
        self.ledger.read().precommits.votes.values().cloned().collect()
    }

    pub fn validators_signed_prevote(&self) -> Vec<bool> {
        self.ledger.read().prevotes.signed(self.validators.len())
    }

    pub fn validators_signed_precommit(&self) -> Vec<bool> {
        self.ledger.read().precommits.signed(self.validators.len())
    }

    pub fn evidence(&self) -> Vec<Equivocation> {
        self.ledger.read().evidence.clone()
    }

    /// Hash holding +2/3 prevotes, if any
    pub fn majority_prevote_hash(&self) -> Option<Hash> {
        let ledger = self.ledger.read();
        ledger
            .prevotes
            .leading_hash()
            .filter(|(_, count)| self.is_majority(*count))
            .map(|(hash, _)| hash)
    }

    /// Hash holding +2/3 precommits, if any
    pub fn majority_precommit_hash(&self) -> Option<Hash> {
        let ledger = self.ledger.read();
        ledger
            .precommits
            .leading_hash()
            .filter(|(_, count)| self.is_majority(*count))
            .map(|(hash, _)| hash)
    }

    pub fn has_majority_prevotes(&self) -> bool {
        self.majority_prevote_hash().is_some()
    }

    pub fn has_majority_prevotes_for(&self, block_hash: &Hash) -> bool {
        self.is_majority(self.ledger.read().prevotes.count(Some(*block_hash)))
    }

    pub fn has_majority_prevotes_any(&self) -> bool {
        self.is_majority(self.ledger.read().prevotes.votes.len())
    }

    pub fn has_majority_prevotes_null(&self) -> bool {
        self.is_majority(self.ledger.read().prevotes.count(None))
    }

    pub fn has_majority_precommits(&self) -> bool {
        self.majority_precommit_hash().is_some()
    }

    pub fn has_majority_precommits_for(&self, block_hash: &Hash) -> bool {
        self.is_majority(self.ledger.read().precommits.count(Some(*block_hash)))
    }

    pub fn has_majority_precommits_any(&self) -> bool {
        self.is_majority(self.ledger.read().precommits.votes.len())
    }

    pub fn has_minority_prevotes_or_precommits(&self) -> bool {
        let ledger = self.ledger.read();
        self.is_minority(ledger.prevotes.votes.len())
            || self.is_minority(ledger.precommits.votes.len())
    }

    /// Aggregate the prevotes of the majority hash
    pub fn aggregate_prevotes(&self) -> Result<AggregatedSignature, ConsensusError> {
        let ledger = self.ledger.read();
        let target = ledger.prevotes.leading_hash().map(|(hash, _)| hash);
        let signatures: BTreeMap<u32, Sig> = ledger
            .prevotes
            .votes
            .iter()
            .filter(|(_, vote)| target.is_some() && vote.block_hash == target)
            .map(|(index, vote)| (*index, vote.signature))
            .collect();
        aggregator::aggregate(&signatures, self.validators.len())
    }

    /// Aggregate the precommits of the majority hash
    pub fn aggregate_precommits(&self) -> Result<AggregatedSignature, ConsensusError> {
        let ledger = self.ledger.read();
        let target = ledger.precommits.leading_hash().map(|(hash, _)| hash);
        Self::aggregate_precommits_for(&ledger, target, self.validators.len())
    }

    fn aggregate_precommits_for(
        ledger: &Ledger,
        target: Option<Hash>,
        total: usize,
    ) -> Result<AggregatedSignature, ConsensusError> {
        let signatures: BTreeMap<u32, Sig> = ledger
            .precommits
            .votes
            .iter()
            .filter(|(_, vote)| target.is_some() && vote.block_hash == target)
            .map(|(index, vote)| (*index, vote.signature))
            .collect();
        aggregator::aggregate(&signatures, total)
    }

    /// Debug-log prevoters grouped by block hash
    pub fn log_prevotes(&self) {
        let ledger = self.ledger.read();
        for block_hash in ledger.prevotes.counts.keys() {
            let voters: Vec<u32> = ledger
                .prevotes
                .votes
                .values()
                .filter(|vote| vote.block_hash == *block_hash)
                .map(|vote| vote.validator_index)
                .collect();
            debug!(
                "Block {} prevoted by: {:?}",
                block_hash.map_or("null".to_string(), |h| h.short()),
                voters
            );
        }
    }

    /// Debug-log precommitters grouped by block hash
    pub fn log_precommits(&self) {
        let ledger = self.ledger.read();
        for block_hash in ledger.precommits.counts.keys() {
            let voters: Vec<u32> = ledger
                .precommits
                .votes
                .values()
                .filter(|vote| vote.block_hash == *block_hash)
                .map(|vote| vote.validator_index)
                .collect();
            debug!(
                "Block {} precommitted by: {:?}",
                block_hash.map_or("null".to_string(), |h| h.short()),
                voters
            );
        }
    }

    fn is_majority(&self, count: usize) -> bool {
        is_majority(count, self.validators.len())
    }

    fn is_minority(&self, count: usize) -> bool {
        is_minority(count, self.validators.len())
    }
}

impl ProcessableUnit for RoundState {
    fn height(&self) -> u64 {
        self.height
    }

    fn round(&self) -> u32 {
        self.round
    }

    fn block(&self) -> Option<Block> {
        self.ledger.read().proposal.as_ref().map(|p| p.block.clone())
    }

    fn processor_result(&self) -> Option<BlockProcessorResult> {
        self.ledger.read().processor_result.clone()
    }

    fn set_processor_result(&self, result: BlockProcessorResult) {
        let mut ledger = self.ledger.write();
        if ledger.processor_result.is_none() {
            ledger.processor_result = Some(result);
        }
    }

    /// Commit for the proposed block, built once from the precommits that
    /// voted for it.
    fn commit(&self) -> Result<Commit, ConsensusError> {
        let mut ledger = self.ledger.write();
        if let Some(commit) = &ledger.commit {
            return Ok(commit.clone());
        }

        let block = match &ledger.proposal {
            Some(proposal) => proposal.block.clone(),
            None => {
                return Err(ConsensusError::ProposalMissing {
                    height: self.height,
                    round: self.round,
                })
            }
        };
        let signature =
            Self::aggregate_precommits_for(&ledger, Some(block.hash()), self.validators.len())?;

        let commit = Commit {
            block,
            proof: CommitProof {
                round: self.round,
                signature,
            },
        };
        ledger.commit = Some(commit.clone());
        Ok(commit)
    }
}

impl fmt::Debug for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ledger = self.ledger.read();
        f.debug_struct("RoundState")
            .field("height", &self.height)
            .field("round", &self.round)
            .field("proposer_index", &self.proposer_index)
            .field("has_proposal", &ledger.proposal.is_some())
            .field("prevotes", &ledger.prevotes.votes.len())
            .field("precommits", &ledger.precommits.votes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::KeyPair;

    const AA: Hash = Hash([0xAA; 32]);
    const BB: Hash = Hash([0xBB; 32]);

    fn keys(n: u8) -> Vec<KeyPair> {
        (1..=n).map(KeyPair::from_seed).collect()
    }

    fn round_state(keys: &[KeyPair], height: u64, round: u32) -> RoundState {
        let validators = keys
            .iter()
            .enumerate()
            .map(|(i, k)| Validator::new(i as u32, k.public))
            .collect();
        RoundState::new(height, round, validators, 0)
    }

    fn prevote(keys: &[KeyPair], index: u32, hash: Option<Hash>) -> Prevote {
        Prevote::new_signed(1, 0, hash, index, &keys[index as usize].secret).unwrap()
    }

    fn precommit(keys: &[KeyPair], index: u32, hash: Option<Hash>) -> Precommit {
        Precommit::new_signed(1, 0, hash, index, &keys[index as usize].secret).unwrap()
    }

    #[test]
    fn test_three_of_four_precommits_reach_majority() {
        let keys = keys(4);
        let rs = round_state(&keys, 1, 0);

        for index in 0..3 {
            assert!(rs.add_precommit(precommit(&keys, index, Some(AA))));
        }

        assert!(rs.has_majority_precommits());
        assert_eq!(rs.majority_precommit_hash(), Some(AA));
        let aggregated = rs.aggregate_precommits().unwrap();
        assert_eq!(aggregated.validators, vec![true, true, true, false]);

        // Validator 2 already precommitted: the conflicting vote is refused
        assert!(!rs.add_precommit(precommit(&keys, 2, Some(BB))));
        assert!(!rs.has_majority_precommits_for(&BB));
        assert_eq!(rs.precommit(2).unwrap().block_hash, Some(AA));
        assert_eq!(rs.evidence().len(), 1);
    }

    #[test]
    fn test_duplicate_prevote_is_noop() {
        let keys = keys(4);
        let rs = round_state(&keys, 1, 0);
        let vote = prevote(&keys, 1, Some(AA));

        assert!(rs.add_prevote(vote.clone()));
        let before = rs.prevotes();
        assert!(!rs.add_prevote(vote));

        assert_eq!(rs.prevotes(), before);
        assert!(rs.evidence().is_empty());
    }

    #[test]
    fn test_nil_and_any_majorities_are_separate() {
        let keys = keys(4);
        let rs = round_state(&keys, 1, 0);

        rs.add_prevote(prevote(&keys, 0, None));
        rs.add_prevote(prevote(&keys, 1, None));
        rs.add_prevote(prevote(&keys, 2, Some(AA)));

        assert!(rs.has_majority_prevotes_any());
        assert!(!rs.has_majority_prevotes_null());
        assert!(!rs.has_majority_prevotes());

        rs.add_prevote(prevote(&keys, 3, None));
        assert!(rs.has_majority_prevotes_null());
        assert!(rs.aggregate_prevotes().is_err());
        assert_eq!(rs.validators_signed_prevote(), vec![true; 4]);
    }

    #[test]
    fn test_minority_triggers_on_either_phase() {
        let keys = keys(4);
        let rs = round_state(&keys, 1, 0);

        rs.add_prevote(prevote(&keys, 0, Some(AA)));
        assert!(!rs.has_minority_prevotes_or_precommits());

        rs.add_precommit(precommit(&keys, 1, None));
        assert!(!rs.has_minority_prevotes_or_precommits());

        rs.add_precommit(precommit(&keys, 2, Some(AA)));
        assert!(rs.has_minority_prevotes_or_precommits());
    }

    #[test]
    fn test_height_and_round_fixed_for_lifetime() {
        let keys = keys(4);
        let rs = round_state(&keys, 7, 3);

        rs.add_prevote(prevote(&keys, 0, Some(AA)));
        rs.add_precommit(precommit(&keys, 0, Some(AA)));
        rs.set_processor_result(BlockProcessorResult::failed());

        assert_eq!(rs.height(), 7);
        assert_eq!(rs.round(), 3);
    }

    #[test]
    fn test_processor_result_set_once() {
        let keys = keys(4);
        let rs = round_state(&keys, 1, 0);
        assert!(rs.processor_result().is_none());

        rs.set_processor_result(BlockProcessorResult::failed());
        rs.set_processor_result(BlockProcessorResult::succeeded(AA, 1));

        assert_eq!(rs.processor_result(), Some(BlockProcessorResult::failed()));
    }

    #[test]
    fn test_commit_requires_proposal_and_matching_precommits() {
        let keys = keys(4);
        let mut block = Block::genesis(1, 0);
        block.header.height = 1;
        let hash = block.hash();
        let rs = round_state(&keys, 1, 0);

        for index in 0..3 {
            rs.add_precommit(precommit(&keys, index, Some(hash)));
        }
        assert!(matches!(
            rs.commit(),
            Err(ConsensusError::ProposalMissing { .. })
        ));

        let proposal = Proposal::new_signed(0, None, block, None, 0, &keys[0].secret).unwrap();
        assert!(rs.add_proposal(proposal.clone()));
        assert!(!rs.add_proposal(proposal));

        let commit = rs.commit().unwrap();
        assert_eq!(commit.block_hash(), hash);
        assert_eq!(commit.proof.round, 0);
        assert_eq!(commit.proof.signature.signer_count(), 3);
    }
}
