use cairn_core::{PublicKey, Validator};

/// Read-only view of the validators eligible at a height
pub trait ValidatorSet: Send + Sync {
    /// Validators of every round at `height`, ordered by index
    fn round_validators(&self, height: u64) -> Vec<Validator>;

    fn validator(&self, index: u32) -> Option<Validator>;

    /// Index of the validator proposing `(height, round)`
    fn proposer_index(&self, height: u64, round: u32) -> u32;
}

/// Fixed validator set with round-robin proposer selection
#[derive(Debug, Clone)]
pub struct StaticValidatorSet {
    validators: Vec<Validator>,
}

impl StaticValidatorSet {
    pub fn new(public_keys: Vec<PublicKey>) -> Self {
        let validators = public_keys
            .into_iter()
            .enumerate()
            .map(|(index, public_key)| Validator::new(index as u32, public_key))
            .collect();
        StaticValidatorSet { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl ValidatorSet for StaticValidatorSet {
    fn round_validators(&self, _height: u64) -> Vec<Validator> {
        self.validators.clone()
    }

    fn validator(&self, index: u32) -> Option<Validator> {
        self.validators.get(index as usize).copied()
    }

    fn proposer_index(&self, height: u64, round: u32) -> u32 {
        if self.validators.is_empty() {
            return 0;
        }
        ((height + u64::from(round)) % self.validators.len() as u64) as u32
    }
}
