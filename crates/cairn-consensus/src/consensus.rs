//! The consensus state machine.
//!
//! A single task owns the consensus state and consumes [`ConsensusCommand`]s:
//! processors wake it with `Handle` after applying a message, timers post
//! timeouts, and peers' commits arrive as `CommitState`. Transitions follow
//! the Tendermint rules: propose, prevote, precommit, commit, with locking on
//! +2/3 prevotes and round skips on +1/3 messages from a later round.

use std::sync::Arc;

use cairn_core::{AggregatedSignature, Block, Hash, Proposal};
use cairn_storage::{ConsensusStore, Storage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::block_processor::{BlockProcessor, BlockProcessorResult, ProcessableUnit};
use crate::bootstrapper::{persist, Bootstrapper};
use crate::broadcaster::Broadcaster;
use crate::commit_lock::CommitLock;
use crate::commit_state::CommitState;
use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::events::{ConsensusEvent, ConsensusEventSink};
use crate::handle::{CommandSender, ConsensusCommand, ConsensusHandle};
use crate::local_validator::{LocalValidator, LocalValidators};
use crate::processors::{ProcessorContext, ProcessorResult, Processors};
use crate::round_state::RoundState;
use crate::round_state_repository::RoundStateRepository;
use crate::scheduler::Scheduler;
use crate::state::{ConsensusState, StateData, Step};
use crate::timestamp;
use crate::validator_set::ValidatorSet;
use crate::worker_pool::CryptoPool;

/// External services the consensus core runs against
pub struct Collaborators {
    pub validator_set: Arc<dyn ValidatorSet>,
    pub block_processor: Arc<dyn BlockProcessor>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub local_validators: LocalValidators,
    pub event_sink: Option<Arc<dyn ConsensusEventSink>>,
}

pub struct Consensus<S: Storage> {
    validator_set: Arc<dyn ValidatorSet>,
    block_processor: Arc<dyn BlockProcessor>,
    local_validators: LocalValidators,
    event_sink: Option<Arc<dyn ConsensusEventSink>>,
    repository: Arc<RoundStateRepository>,
    store: ConsensusStore<S>,
    processors: Processors,
    scheduler: Scheduler,
    commit_lock: CommitLock,
    pool: CryptoPool,
    commands: CommandSender,
    inbox: mpsc::UnboundedReceiver<ConsensusCommand>,
    published: watch::Sender<StateData>,
    state: ConsensusState,
    did_majority_prevote: bool,
    did_majority_precommit: bool,
    disposed: bool,
    pending_proposal: Option<Proposal>,
    round_start_time: u64,
}

impl<S: Storage + 'static> Consensus<S> {
    pub fn new(
        config: ConsensusConfig,
        collaborators: Collaborators,
        store: ConsensusStore<S>,
    ) -> (Self, ConsensusHandle) {
        let Collaborators {
            validator_set,
            block_processor,
            broadcaster,
            local_validators,
            event_sink,
        } = collaborators;

        let (tx, inbox) = mpsc::unbounded_channel();
        let commands = CommandSender::new(tx);
        let height = block_processor.last_block().height + 1;
        let (published, state_rx) = watch::channel(StateData::new(height));
        let repository = Arc::new(RoundStateRepository::new(validator_set.clone()));
        let commit_lock = CommitLock::new();
        let pool = CryptoPool::from_config(&config);

        let context = Arc::new(ProcessorContext {
            config: config.clone(),
            validator_set: validator_set.clone(),
            block_processor: block_processor.clone(),
            broadcaster,
            repository: repository.clone(),
            commit_lock: commit_lock.clone(),
            state: state_rx.clone(),
            commands: commands.clone(),
            pool: pool.clone(),
            aggregator: Aggregator::new(validator_set.clone(), pool.clone()),
        });
        let processors = Processors::new(context);
        let handle = ConsensusHandle::new(commands.clone(), state_rx, processors.clone());

        let consensus = Consensus {
            validator_set,
            block_processor,
            local_validators,
            event_sink,
            repository,
            store,
            processors,
            scheduler: Scheduler::new(config, commands.raw()),
            commit_lock,
            pool,
            commands,
            inbox,
            published,
            state: ConsensusState::new(height),
            did_majority_prevote: false,
            did_majority_precommit: false,
            disposed: false,
            pending_proposal: None,
            round_start_time: 0,
        };

        (consensus, handle)
    }

    /// Run the control loop on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<Result<(), ConsensusError>> {
        tokio::spawn(self.run())
    }

    /// Bootstrap, start the restored round, then serve commands until
    /// disposed. Returns an error only for fatal conditions.
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        self.bootstrap()?;
        self.start_round(self.state.round).await?;

        let current = self
            .repository
            .get_round_state(self.state.height, self.state.round);
        self.handle(current).await?;

        // A proposal and +2/3 precommits may already be stored for earlier rounds
        let mut round = 0;
        while round < self.state.round {
            let round_state = self.repository.get_round_state(self.state.height, round);
            self.handle(round_state).await?;
            round += 1;
        }

        while let Some(command) = self.inbox.recv().await {
            match command {
                ConsensusCommand::Handle(round_state) => {
                    self.commands
                        .take_pending(round_state.height(), round_state.round());
                    self.handle(round_state).await?;
                }
                ConsensusCommand::CommitState(commit_state, reply) => {
                    let result = self.handle_commit_state(&commit_state).await?;
                    let _ = reply.send(result);
                }
                ConsensusCommand::TimeoutStartRound { height, round } => {
                    self.on_timeout_start_round(height, round).await?;
                }
                ConsensusCommand::TimeoutPropose { height, round } => {
                    self.on_timeout_propose(height, round).await?;
                }
                ConsensusCommand::TimeoutPrevote { height, round } => {
                    self.on_timeout_prevote(height, round).await?;
                }
                ConsensusCommand::TimeoutPrecommit { height, round } => {
                    self.on_timeout_precommit(height, round).await?;
                }
                ConsensusCommand::Dispose(reply) => {
                    let result = self.dispose();
                    let _ = reply.send(result);
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    fn bootstrap(&mut self) -> Result<(), ConsensusError> {
        let height = self.block_processor.last_block().height + 1;
        self.state = ConsensusState::new(height);

        let restored = Bootstrapper::new(&self.repository, &self.store).run()?;
        if let Some(restored) = restored {
            if restored.height == height {
                self.state = restored;
            } else {
                warn!(
                    "Skipping state restore, because stored height is {}, but should be {}",
                    restored.height, height
                );
                self.repository.clear();
            }
        }

        info!(
            "Completed consensus bootstrap for {}/{}",
            self.state.height, self.state.round
        );
        self.emit(ConsensusEvent::Bootstrapped);
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), ConsensusError> {
        self.scheduler.clear();
        self.disposed = true;
        persist(&mut self.store, &self.state.data(), &self.repository)
    }

    async fn handle(&mut self, round_state: Arc<RoundState>) -> Result<(), ConsensusError> {
        if self.disposed || round_state.height() != self.state.height {
            return Ok(());
        }

        self.process_proposal(&round_state).await;

        self.on_proposal(&round_state).await?;
        self.on_proposal_locked(&round_state).await?;

        let proposed = round_state.proposal_block_hash();

        if let Some(hash) = &proposed {
            if round_state.has_majority_prevotes_for(hash) {
                self.on_majority_prevote(&round_state).await?;
            }
        }

        if round_state.has_majority_prevotes_any() {
            self.on_majority_prevote_any(&round_state);
        }

        if round_state.has_majority_prevotes_null() {
            self.on_majority_prevote_null(&round_state).await?;
        }

        if round_state.has_majority_precommits_any() {
            self.on_majority_precommit_any(&round_state);
        }

        if let Some(hash) = &proposed {
            if round_state.has_majority_precommits_for(hash) {
                self.on_majority_precommit(round_state.as_ref()).await?;
            }
        }

        if round_state.has_minority_prevotes_or_precommits() {
            self.on_minority_with_higher_round(&round_state).await?;
        }

        Ok(())
    }

    async fn handle_commit_state(
        &mut self,
        commit_state: &CommitState,
    ) -> Result<ProcessorResult, ConsensusError> {
        if self.disposed || commit_state.height() != self.state.height {
            return Ok(ProcessorResult::Skipped);
        }

        if commit_state.processor_result().is_none() {
            if let Some(block) = commit_state.block() {
                commit_state.set_processor_result(self.block_processor.process(&block));
            }
        }

        self.on_majority_precommit(commit_state).await?;

        Ok(if is_success(commit_state) {
            ProcessorResult::Accepted
        } else {
            ProcessorResult::Invalid
        })
    }

    async fn start_round(&mut self, round: u32) -> Result<(), ConsensusError> {
        self.state.round = round;
        self.state.step = Step::Propose;
        self.did_majority_prevote = false;
        self.did_majority_precommit = false;
        self.pending_proposal = None;
        self.round_start_time = timestamp::now_ms();

        self.scheduler.clear();

        if self.disposed {
            return Ok(());
        }

        let height = self.state.height;
        let round_state = self.repository.get_round_state(height, round);
        info!(
            ">> Starting new round: {}/{} with proposer: {}",
            height,
            round,
            round_state.proposer_index()
        );
        self.emit(ConsensusEvent::RoundStarted);

        let last_block = self.block_processor.last_block();
        let timestamp =
            self.scheduler
                .next_block_timestamp(&last_block, round, self.round_start_time)?;
        self.scheduler
            .schedule_timeout_block_prepare(height, round, timestamp);

        self.propose(&round_state, timestamp).await;
        Ok(())
    }

    async fn on_timeout_start_round(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.state.height != height || self.state.round != round {
            return Ok(());
        }

        self.scheduler.schedule_timeout_propose(height, round);

        if let Some(proposal) = self.pending_proposal.take() {
            let result = self.processors.proposal.process(proposal, true).await;
            if result != ProcessorResult::Accepted {
                warn!("Own proposal {}/{} was not accepted: {:?}", height, round, result);
            }
        }
        Ok(())
    }

    async fn on_proposal(&mut self, round_state: &RoundState) -> Result<(), ConsensusError> {
        if self.state.step != Step::Propose || self.is_invalid_round_state(round_state) {
            return Ok(());
        }
        let Some(proposal) = round_state.proposal() else {
            return Ok(());
        };
        if proposal.valid_round.is_some() {
            return Ok(());
        }

        self.state.step = Step::Prevote;

        let block_hash = proposal.block_hash();
        info!(
            "Received proposal {}/{} block hash: {}",
            self.state.height,
            self.state.round,
            block_hash.short()
        );
        self.emit(ConsensusEvent::ProposalAccepted);

        let value = (self.is_lock_compatible(&block_hash) && is_success(round_state))
            .then_some(block_hash);
        self.prevote(value).await
    }

    async fn on_proposal_locked(&mut self, round_state: &RoundState) -> Result<(), ConsensusError> {
        if self.state.step != Step::Propose || self.is_invalid_round_state(round_state) {
            return Ok(());
        }
        let Some(proposal) = round_state.proposal() else {
            return Ok(());
        };
        let Some(valid_round) = proposal.valid_round else {
            return Ok(());
        };
        if proposal.lock_proof.is_none() || valid_round >= self.state.round {
            return Ok(());
        }

        self.state.step = Step::Prevote;

        let block_hash = proposal.block_hash();
        info!(
            "Received proposal {}/{} with locked block hash: {}",
            self.state.height,
            self.state.round,
            block_hash.short()
        );
        self.emit(ConsensusEvent::ProposalAccepted);

        let unlocked = self
            .state
            .locked_round()
            .map_or(true, |locked_round| locked_round <= valid_round)
            || self.is_lock_compatible(&block_hash);
        if unlocked && is_success(round_state) {
            self.prevote(Some(block_hash)).await
        } else {
            self.prevote(None).await
        }
    }

    async fn on_majority_prevote(
        &mut self,
        round_state: &Arc<RoundState>,
    ) -> Result<(), ConsensusError> {
        if self.did_majority_prevote
            || self.state.step == Step::Propose
            || self.is_invalid_round_state(round_state)
            || !is_success(round_state.as_ref())
        {
            return Ok(());
        }
        let Some(block_hash) = round_state.proposal_block_hash() else {
            return Ok(());
        };

        info!(
            "Received +2/3 prevotes for {}/{} block hash: {}",
            self.state.height,
            self.state.round,
            block_hash.short()
        );

        self.did_majority_prevote = true;

        if self.state.step == Step::Prevote {
            self.state.locked_value = Some(round_state.clone());
            self.state.valid_value = Some(round_state.clone());
            self.state.step = Step::Precommit;

            self.emit(ConsensusEvent::PrevotedProposal);
            self.precommit(Some(block_hash)).await
        } else {
            self.state.valid_value = Some(round_state.clone());

            self.emit(ConsensusEvent::PrevotedProposal);
            Ok(())
        }
    }

    fn on_majority_prevote_any(&mut self, round_state: &RoundState) {
        if self.state.step != Step::Prevote || self.is_invalid_round_state(round_state) {
            return;
        }

        if self
            .scheduler
            .schedule_timeout_prevote(self.state.height, self.state.round)
        {
            self.emit(ConsensusEvent::PrevotedAny);
        }
    }

    async fn on_majority_prevote_null(&mut self, round_state: &RoundState) -> Result<(), ConsensusError> {
        if self.state.step != Step::Prevote || self.is_invalid_round_state(round_state) {
            return Ok(());
        }

        info!(
            "Received +2/3 prevotes for {}/{} block hash: null",
            self.state.height, self.state.round
        );

        self.state.step = Step::Precommit;

        self.emit(ConsensusEvent::PrevotedNull);
        self.precommit(None).await
    }

    fn on_majority_precommit_any(&mut self, round_state: &RoundState) {
        if self.is_invalid_round_state(round_state) {
            return;
        }

        if self
            .scheduler
            .schedule_timeout_precommit(self.state.height, self.state.round)
        {
            self.emit(ConsensusEvent::PrecommitedAny);
        }
    }

    /// Commit the unit's block. The height must match; the round may be any.
    async fn on_majority_precommit(
        &mut self,
        unit: &dyn ProcessableUnit,
    ) -> Result<(), ConsensusError> {
        if self.did_majority_precommit || unit.height() != self.state.height {
            return Ok(());
        }
        let Some(block) = unit.block() else {
            return Ok(());
        };

        self.did_majority_precommit = true;
        let height = self.state.height;
        let block_hash = block.hash();

        let result = unit
            .processor_result()
            .unwrap_or_else(BlockProcessorResult::failed);
        if !result.success {
            info!(
                "Block {} on height {} received +2/3 precommits but is invalid",
                block_hash.short(),
                height
            );
            return Ok(());
        }

        info!(
            "Received +2/3 precommits for {}/{} block hash: {}",
            height,
            unit.round(),
            block_hash.short()
        );
        self.emit(ConsensusEvent::PrecommitedProposal);

        let commit = unit.commit()?;

        let commit_lock = self.commit_lock.clone();
        {
            let _guard = commit_lock.exclusive().await;

            if let Err(e) = self.block_processor.commit(&commit, &result) {
                error!("Failed to commit block {}: {}", block_hash.short(), e);
                return Err(e);
            }

            self.repository.clear();

            self.state.height += 1;
            self.state.round = 0;
            self.state.step = Step::Propose;
            self.state.locked_value = None;
            self.state.valid_value = None;
            self.publish();
        }

        self.emit(ConsensusEvent::BlockCommitted { height, block_hash });
        self.start_round(0).await
    }

    async fn on_minority_with_higher_round(
        &mut self,
        round_state: &RoundState,
    ) -> Result<(), ConsensusError> {
        if round_state.height() != self.state.height || round_state.round() <= self.state.round {
            return Ok(());
        }

        info!(
            "Received +1/3 messages for {}/{}, skipping round {}",
            round_state.height(),
            round_state.round(),
            self.state.round
        );
        self.start_round(round_state.round()).await
    }

    async fn on_timeout_propose(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.state.step != Step::Propose
            || self.state.height != height
            || self.state.round != round
        {
            return Ok(());
        }

        info!("Timeout to propose {}/{} expired", height, round);

        self.state.step = Step::Prevote;
        self.publish();
        self.prevote(None).await
    }

    async fn on_timeout_prevote(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.state.step != Step::Prevote
            || self.state.height != height
            || self.state.round != round
        {
            return Ok(());
        }

        info!("Timeout to prevote {}/{} expired", height, round);
        self.repository.get_round_state(height, round).log_prevotes();

        self.state.step = Step::Precommit;
        self.publish();
        self.precommit(None).await
    }

    async fn on_timeout_precommit(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.state.height != height || self.state.round != round {
            return Ok(());
        }

        info!("Timeout to precommit {}/{} expired", height, round);
        let round_state = self.repository.get_round_state(height, round);
        round_state.log_prevotes();
        round_state.log_precommits();

        self.start_round(round + 1).await
    }

    /// Build this node's proposal if it holds the round proposer's key. The
    /// proposal is fed through the processor when the block-prepare timer
    /// fires.
    async fn propose(&mut self, round_state: &RoundState, timestamp: u64) {
        if round_state.has_proposal() {
            return;
        }
        let Some(proposer) = round_state.proposer() else {
            return;
        };
        let Some(local) = self.local_validators.get(&proposer.public_key).cloned() else {
            return;
        };

        info!("Found registered proposer: {}", proposer.index);

        let proposer_index = proposer.index;
        let height = self.state.height;
        let round = self.state.round;
        let parts = match &self.state.valid_value {
            Some(valid_value) => reproposal(valid_value, round),
            None => self
                .block_processor
                .prepare_block(proposer_index, round, timestamp)
                .map(|block| {
                    info!(
                        "Proposing new block {}/{} with block hash: {}",
                        height,
                        round,
                        block.hash().short()
                    );
                    (block, None, None)
                }),
        };
        let (block, valid_round, lock_proof) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Failed to build proposal for {}/{}: {}", height, round, e);
                return;
            }
        };

        let signed = self
            .pool
            .sign(move || local.propose(proposer_index, round, valid_round, block, lock_proof))
            .await;
        match signed {
            Some(Ok(proposal)) => self.pending_proposal = Some(proposal),
            Some(Err(e)) => warn!("Failed to sign proposal for {}/{}: {}", height, round, e),
            None => warn!("Signing proposal for {}/{} did not finish", height, round),
        }
    }

    /// Prevote `value` for every local validator that has not prevoted yet.
    /// A vote whose signing job does not finish is skipped.
    async fn prevote(&mut self, value: Option<Hash>) -> Result<(), ConsensusError> {
        let (height, round) = (self.state.height, self.state.round);
        let round_state = self.repository.get_round_state(height, round);
        let signers = self.local_signers(|index| round_state.has_prevote(index));

        for (index, local) in signers {
            let signed = self
                .pool
                .sign(move || local.prevote(index, height, round, value))
                .await;
            match signed {
                Some(prevote) => {
                    self.processors.prevote.process(prevote?, true).await;
                }
                None => warn!(
                    "Signing prevote {}/{} for validator {} did not finish",
                    height, round, index
                ),
            }
        }
        Ok(())
    }

    /// Precommit `value` for every local validator that has not precommitted yet
    async fn precommit(&mut self, value: Option<Hash>) -> Result<(), ConsensusError> {
        let (height, round) = (self.state.height, self.state.round);
        let round_state = self.repository.get_round_state(height, round);
        let signers = self.local_signers(|index| round_state.has_precommit(index));

        for (index, local) in signers {
            let signed = self
                .pool
                .sign(move || local.precommit(index, height, round, value))
                .await;
            match signed {
                Some(precommit) => {
                    self.processors.precommit.process(precommit?, true).await;
                }
                None => warn!(
                    "Signing precommit {}/{} for validator {} did not finish",
                    height, round, index
                ),
            }
        }
        Ok(())
    }

    /// Local validators of the current height that have not voted yet
    fn local_signers(&self, has_voted: impl Fn(u32) -> bool) -> Vec<(u32, LocalValidator)> {
        self.validator_set
            .round_validators(self.state.height)
            .into_iter()
            .filter(|validator| !has_voted(validator.index))
            .filter_map(|validator| {
                self.local_validators
                    .get(&validator.public_key)
                    .map(|local| (validator.index, local.clone()))
            })
            .collect()
    }

    /// Execute the proposal's block once per round state. A proposal whose
    /// lock proof does not verify is recorded as failed.
    async fn process_proposal(&self, round_state: &RoundState) {
        if round_state.processor_result().is_some() {
            return;
        }
        let Some(proposal) = round_state.proposal() else {
            return;
        };

        let result = if self.processors.proposal.has_valid_lock_proof(&proposal).await {
            self.block_processor.process(&proposal.block)
        } else {
            BlockProcessorResult::failed()
        };
        round_state.set_processor_result(result);
    }

    /// No lock is held, or the lock is on `block_hash`
    fn is_lock_compatible(&self, block_hash: &Hash) -> bool {
        self.state
            .locked_value
            .as_ref()
            .map_or(true, |locked| locked.proposal_block_hash().as_ref() == Some(block_hash))
    }

    fn is_invalid_round_state(&self, round_state: &RoundState) -> bool {
        round_state.height() != self.state.height || round_state.round() != self.state.round
    }

    fn publish(&self) {
        self.published.send_replace(self.state.data());
    }

    fn emit(&self, event: ConsensusEvent) {
        let data = self.state.data();
        self.published.send_replace(data.clone());
        if let Some(sink) = &self.event_sink {
            sink.on_consensus_event(&event, &data);
        }
    }
}

type ProposalParts = (Block, Option<u32>, Option<AggregatedSignature>);

/// Block, valid round and lock proof for re-proposing a value that gathered
/// +2/3 prevotes in an earlier round
fn reproposal(valid_value: &RoundState, round: u32) -> Result<ProposalParts, ConsensusError> {
    let block = valid_value
        .block()
        .ok_or(ConsensusError::ProposalMissing {
            height: valid_value.height(),
            round: valid_value.round(),
        })?;
    let lock_proof = valid_value.aggregate_prevotes()?;

    info!(
        "Proposing valid block {}/{} from round {} with block hash: {}",
        valid_value.height(),
        round,
        valid_value.round(),
        block.hash().short()
    );

    Ok((block, Some(valid_value.round()), Some(lock_proof)))
}

fn is_success(unit: &dyn ProcessableUnit) -> bool {
    unit.processor_result().is_some_and(|result| result.success)
}
