//! Block time milestones.
//!
//! A block for round `r` may not carry a timestamp earlier than
//!
//! ```text
//! prev.timestamp + block_time + r * stage_timeout + increase * r'(r' + 1) / 2,  r' = max(0, r - 1)
//! ```
//!
//! Messages for rounds whose minimal timestamp lies in the future (beyond the
//! tolerated drift) cannot have been produced by an honest node yet.

use std::time::{SystemTime, UNIX_EPOCH};

use cairn_core::BlockHeader;

use crate::config::ConsensusConfig;
use crate::error::ConsensusError;

/// Rounds above this are refused to keep the arithmetic in range
pub const MAX_ROUND: u32 = 100_000;

/// Milliseconds since the unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub fn minimal_timestamp(
    config: &ConsensusConfig,
    previous: &BlockHeader,
    round: u32,
) -> Result<u64, ConsensusError> {
    if round > MAX_ROUND {
        return Err(ConsensusError::RoundLimitExceeded(round));
    }

    let overflow = || ConsensusError::RoundLimitExceeded(round);
    let r = u64::from(round);
    let round_for_math = r.saturating_sub(1);

    let increase = (round_for_math * (round_for_math + 1) / 2)
        .checked_mul(config.stage_timeout_increase_ms)
        .ok_or_else(overflow)?;
    r.checked_mul(config.stage_timeout_ms)
        .and_then(|stages| stages.checked_add(increase))
        .and_then(|offset| offset.checked_add(config.block_time_ms))
        .and_then(|offset| offset.checked_add(previous.timestamp))
        .ok_or_else(overflow)
}

/// Whether a message for `round` is plausible at time `now`
pub fn is_round_in_bounds(
    config: &ConsensusConfig,
    previous: &BlockHeader,
    round: u32,
    now: u64,
) -> bool {
    match minimal_timestamp(config, previous, round) {
        Ok(earliest) => now > earliest.saturating_sub(config.time_drift_ms),
        Err(_) => false,
    }
}

/// Timestamp for a block proposed in a round that started at `round_start`
pub fn next_block_timestamp(
    config: &ConsensusConfig,
    previous: &BlockHeader,
    round: u32,
    round_start: u64,
) -> Result<u64, ConsensusError> {
    let earliest = minimal_timestamp(config, previous, round)?;
    Ok(earliest.max(round_start.saturating_add(config.block_prepare_time_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::Block;

    fn config() -> ConsensusConfig {
        ConsensusConfig {
            block_time_ms: 8000,
            block_prepare_time_ms: 4000,
            stage_timeout_ms: 2000,
            stage_timeout_increase_ms: 2000,
            time_drift_ms: 500,
            ..Default::default()
        }
    }

    fn previous(timestamp: u64) -> BlockHeader {
        Block::genesis(1, timestamp).header
    }

    #[test]
    fn test_minimal_timestamp_progression() {
        let config = config();
        let prev = previous(1_000);

        let expected = [
            (0, 1_000 + 8_000),
            (1, 1_000 + 8_000 + 2_000),
            (2, 1_000 + 8_000 + 4_000 + 2_000),
            (3, 1_000 + 8_000 + 6_000 + 6_000),
            (4, 1_000 + 8_000 + 8_000 + 12_000),
        ];
        for (round, timestamp) in expected {
            assert_eq!(minimal_timestamp(&config, &prev, round).unwrap(), timestamp);
        }
    }

    #[test]
    fn test_round_limit() {
        let config = config();
        let prev = previous(0);

        assert!(minimal_timestamp(&config, &prev, MAX_ROUND).is_ok());
        assert!(matches!(
            minimal_timestamp(&config, &prev, MAX_ROUND + 1),
            Err(ConsensusError::RoundLimitExceeded(_))
        ));
        assert!(!is_round_in_bounds(&config, &prev, MAX_ROUND + 1, u64::MAX));
    }

    #[test]
    fn test_round_in_bounds_tolerates_drift() {
        let config = config();
        let prev = previous(10_000);
        let earliest = 18_000;

        assert!(!is_round_in_bounds(&config, &prev, 0, earliest - 500));
        assert!(is_round_in_bounds(&config, &prev, 0, earliest - 499));
        assert!(is_round_in_bounds(&config, &prev, 0, earliest + 10));
        // Round 1 is not reachable yet at the round 0 milestone
        assert!(!is_round_in_bounds(&config, &prev, 1, earliest));
    }

    #[test]
    fn test_oversized_milestones_are_refused() {
        let prev = previous(1_000);
        let config = ConsensusConfig {
            stage_timeout_increase_ms: u64::MAX / 2,
            ..config()
        };

        assert!(minimal_timestamp(&config, &prev, 1).is_ok());
        assert!(matches!(
            minimal_timestamp(&config, &prev, 3),
            Err(ConsensusError::RoundLimitExceeded(3))
        ));
        assert!(!is_round_in_bounds(&config, &prev, 3, u64::MAX));

        let config = ConsensusConfig {
            block_time_ms: u64::MAX,
            ..self::config()
        };
        assert!(minimal_timestamp(&config, &prev, 0).is_err());
    }

    #[test]
    fn test_next_block_timestamp() {
        let config = config();
        let prev = previous(10_000);

        // Late round start: prepare time dominates
        assert_eq!(next_block_timestamp(&config, &prev, 0, 20_000).unwrap(), 24_000);
        // Early round start: the milestone dominates
        assert_eq!(next_block_timestamp(&config, &prev, 0, 10_500).unwrap(), 18_000);
    }
}
