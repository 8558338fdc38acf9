//! Cairn Consensus - Tendermint-style BFT agreement
//!
//! This crate provides the round state machine, message validation
//! pipelines, timeout scheduling, signature aggregation, and crash-safe
//! persistence of in-progress consensus state.

pub mod aggregator;
pub mod block_processor;
pub mod bootstrapper;
pub mod broadcaster;
pub mod commit_lock;
pub mod commit_state;
pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod handle;
pub mod local_validator;
pub mod processors;
pub mod round_state;
pub mod round_state_repository;
pub mod scheduler;
pub mod state;
pub mod timestamp;
pub mod validator_set;
pub mod worker_pool;

pub use aggregator::{aggregate, Aggregator};
pub use block_processor::{BlockProcessor, BlockProcessorResult, ProcessableUnit};
pub use bootstrapper::Bootstrapper;
pub use broadcaster::{Broadcaster, NoopBroadcaster};
pub use commit_state::CommitState;
pub use config::ConsensusConfig;
pub use consensus::{Collaborators, Consensus};
pub use error::ConsensusError;
pub use events::{ConsensusEvent, ConsensusEventSink};
pub use handle::{ConsensusCommand, ConsensusHandle};
pub use local_validator::{LocalValidator, LocalValidators};
pub use processors::{
    CommitProcessor, PrecommitProcessor, PrevoteProcessor, ProcessorResult, Processors,
    ProposalProcessor,
};
pub use round_state::{Equivocation, RoundState};
pub use round_state_repository::RoundStateRepository;
pub use scheduler::{Scheduler, TimeoutPhase};
pub use state::{ConsensusState, StateData, Step};
pub use validator_set::{StaticValidatorSet, ValidatorSet};
pub use worker_pool::CryptoPool;
