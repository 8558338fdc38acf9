//! BFT quorum arithmetic over `n` equally weighted validators.

/// Smallest vote count that is more than two thirds of `total`.
pub fn majority_threshold(total: usize) -> usize {
    total * 2 / 3 + 1
}

/// Smallest vote count that is more than one third of `total`.
pub fn minority_threshold(total: usize) -> usize {
    total / 3 + 1
}

pub fn is_majority(count: usize, total: usize) -> bool {
    count >= majority_threshold(total)
}

pub fn is_minority(count: usize, total: usize) -> bool {
    count >= minority_threshold(total)
}
