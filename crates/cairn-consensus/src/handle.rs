use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::commit_state::CommitState;
use crate::error::ConsensusError;
use crate::processors::{
    CommitProcessor, PrecommitProcessor, PrevoteProcessor, ProcessorResult, Processors,
    ProposalProcessor,
};
use crate::round_state::RoundState;
use crate::state::StateData;

/// Input of the consensus control loop
#[derive(Debug)]
pub enum ConsensusCommand {
    /// Re-evaluate transitions for a round state that received a message
    Handle(Arc<RoundState>),
    /// Execute and commit a block received with its certificate
    CommitState(CommitState, oneshot::Sender<ProcessorResult>),
    TimeoutStartRound { height: u64, round: u32 },
    TimeoutPropose { height: u64, round: u32 },
    TimeoutPrevote { height: u64, round: u32 },
    TimeoutPrecommit { height: u64, round: u32 },
    /// Stop the loop and persist state
    Dispose(oneshot::Sender<Result<(), ConsensusError>>),
}

/// Sender side of the control loop. `Handle` commands are coalesced: a
/// round state is queued at most once until the loop picks it up.
#[derive(Debug, Clone)]
pub(crate) struct CommandSender {
    tx: mpsc::UnboundedSender<ConsensusCommand>,
    pending: Arc<Mutex<HashSet<(u64, u32)>>>,
}

impl CommandSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ConsensusCommand>) -> Self {
        CommandSender {
            tx,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub(crate) fn handle(&self, round_state: Arc<RoundState>) {
        let key = (round_state.height(), round_state.round());
        if !self.pending.lock().insert(key) {
            return;
        }
        if self.tx.send(ConsensusCommand::Handle(round_state)).is_err() {
            self.pending.lock().remove(&key);
        }
    }

    /// Called by the loop when it dequeues a `Handle` command
    pub(crate) fn take_pending(&self, height: u64, round: u32) {
        self.pending.lock().remove(&(height, round));
    }

    pub(crate) fn send(&self, command: ConsensusCommand) -> Result<(), ConsensusError> {
        self.tx
            .send(command)
            .map_err(|_| ConsensusError::ServiceStopped)
    }

    pub(crate) fn raw(&self) -> mpsc::UnboundedSender<ConsensusCommand> {
        self.tx.clone()
    }
}

/// Entry point for the rest of the node: message processors, the published
/// state and shutdown.
#[derive(Clone)]
pub struct ConsensusHandle {
    commands: CommandSender,
    state: watch::Receiver<StateData>,
    processors: Processors,
}

impl ConsensusHandle {
    pub(crate) fn new(
        commands: CommandSender,
        state: watch::Receiver<StateData>,
        processors: Processors,
    ) -> Self {
        ConsensusHandle {
            commands,
            state,
            processors,
        }
    }

    pub fn state(&self) -> StateData {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateData> {
        self.state.clone()
    }

    pub fn processors(&self) -> &Processors {
        &self.processors
    }

    pub fn proposal_processor(&self) -> &ProposalProcessor {
        &self.processors.proposal
    }

    pub fn prevote_processor(&self) -> &PrevoteProcessor {
        &self.processors.prevote
    }

    pub fn precommit_processor(&self) -> &PrecommitProcessor {
        &self.processors.precommit
    }

    pub fn commit_processor(&self) -> &CommitProcessor {
        &self.processors.commit
    }

    /// Stop the control loop and wait until state is persisted
    pub async fn dispose(&self) -> Result<(), ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(ConsensusCommand::Dispose(tx))?;
        rx.await.map_err(|_| ConsensusError::ServiceStopped)?
    }
}
