//! Consensus timeouts.
//!
//! Each phase has at most one pending timer. A timer is a tokio task that
//! sleeps and then posts the matching command to the control loop; it never
//! touches consensus state itself.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use cairn_core::BlockHeader;

use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::handle::ConsensusCommand;
use crate::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutPhase {
    StartRound,
    Propose,
    Prevote,
    Precommit,
}

struct Timer {
    height: u64,
    round: u32,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    config: ConsensusConfig,
    commands: mpsc::UnboundedSender<ConsensusCommand>,
    timers: HashMap<TimeoutPhase, Timer>,
}

impl Scheduler {
    pub fn new(config: ConsensusConfig, commands: mpsc::UnboundedSender<ConsensusCommand>) -> Self {
        Scheduler {
            config,
            commands,
            timers: HashMap::new(),
        }
    }

    /// Fire `TimeoutStartRound` at the unix timestamp `timestamp` (ms)
    pub fn schedule_timeout_block_prepare(&mut self, height: u64, round: u32, timestamp: u64) -> bool {
        let delay = Duration::from_millis(timestamp.saturating_sub(timestamp::now_ms()));
        self.schedule(
            TimeoutPhase::StartRound,
            height,
            round,
            delay,
            ConsensusCommand::TimeoutStartRound { height, round },
        )
    }

    pub fn schedule_timeout_propose(&mut self, height: u64, round: u32) -> bool {
        self.schedule(
            TimeoutPhase::Propose,
            height,
            round,
            self.config.stage_timeout(round),
            ConsensusCommand::TimeoutPropose { height, round },
        )
    }

    pub fn schedule_timeout_prevote(&mut self, height: u64, round: u32) -> bool {
        self.schedule(
            TimeoutPhase::Prevote,
            height,
            round,
            self.config.stage_timeout(round),
            ConsensusCommand::TimeoutPrevote { height, round },
        )
    }

    pub fn schedule_timeout_precommit(&mut self, height: u64, round: u32) -> bool {
        self.schedule(
            TimeoutPhase::Precommit,
            height,
            round,
            self.config.stage_timeout(round),
            ConsensusCommand::TimeoutPrecommit { height, round },
        )
    }

    /// Earliest timestamp of a block proposed in a round started at `round_start`
    pub fn next_block_timestamp(
        &self,
        previous: &BlockHeader,
        round: u32,
        round_start: u64,
    ) -> Result<u64, ConsensusError> {
        timestamp::next_block_timestamp(&self.config, previous, round, round_start)
    }

    /// Cancel every pending timer
    pub fn clear(&mut self) {
        for (phase, timer) in self.timers.drain() {
            timer.handle.abort();
            trace!(?phase, height = timer.height, round = timer.round, "Timer cancelled");
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Returns `false` if the phase already has a timer for `(height, round)`.
    /// A timer of the same phase for another round is replaced.
    fn schedule(
        &mut self,
        phase: TimeoutPhase,
        height: u64,
        round: u32,
        delay: Duration,
        command: ConsensusCommand,
    ) -> bool {
        if let Some(existing) = self.timers.get(&phase) {
            if existing.height == height && existing.round == round {
                return false;
            }
            existing.handle.abort();
        }

        let commands = self.commands.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The loop is gone after dispose
            let _ = commands.send(command);
        });

        debug!(?phase, height, round, delay_ms = delay.as_millis() as u64, "Timer set");
        self.timers.insert(
            phase,
            Timer {
                height,
                round,
                handle,
            },
        );
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (Scheduler, mpsc::UnboundedReceiver<ConsensusCommand>) {
        let config = ConsensusConfig {
            stage_timeout_ms: 10,
            stage_timeout_increase_ms: 10,
            ..Default::default()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        (Scheduler::new(config, tx), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ConsensusCommand>) -> Option<ConsensusCommand> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_timeout_propose_fires() {
        let (mut scheduler, mut rx) = scheduler();
        assert!(scheduler.schedule_timeout_propose(1, 2));

        let command = next(&mut rx).await;
        assert!(matches!(
            command,
            Some(ConsensusCommand::TimeoutPropose { height: 1, round: 2 })
        ));
    }

    #[tokio::test]
    async fn test_same_round_is_scheduled_once() {
        let (mut scheduler, mut rx) = scheduler();
        assert!(scheduler.schedule_timeout_prevote(1, 2));
        assert!(!scheduler.schedule_timeout_prevote(1, 2));

        assert!(matches!(
            next(&mut rx).await,
            Some(ConsensusCommand::TimeoutPrevote { .. })
        ));
        assert!(next(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_phases_are_independent() {
        let (mut scheduler, _rx) = scheduler();
        assert!(scheduler.schedule_timeout_propose(1, 0));
        assert!(scheduler.schedule_timeout_prevote(1, 0));
        assert!(scheduler.schedule_timeout_precommit(1, 0));
        assert_eq!(scheduler.active_count(), 3);
    }

    #[tokio::test]
    async fn test_clear_cancels_pending_timers() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.schedule_timeout_precommit(1, 0);
        scheduler.schedule_timeout_block_prepare(1, 0, timestamp::now_ms() + 20);
        scheduler.clear();

        assert_eq!(scheduler.active_count(), 0);
        assert!(next(&mut rx).await.is_none());

        // A cleared slot can be scheduled again
        assert!(scheduler.schedule_timeout_precommit(1, 0));
    }

    #[tokio::test]
    async fn test_block_prepare_in_the_past_fires_immediately() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.schedule_timeout_block_prepare(4, 1, 0);

        assert!(matches!(
            next(&mut rx).await,
            Some(ConsensusCommand::TimeoutStartRound { height: 4, round: 1 })
        ));
    }
}
