use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cairn_consensus::ConsensusConfig;
use cairn_core::{KeyPair, PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chain ID
    pub chain_id: u64,

    /// Node data directory
    pub data_dir: PathBuf,

    /// Genesis block timestamp in milliseconds
    pub genesis_timestamp: u64,

    /// Public keys (hex) of the validator set, in index order
    pub validators: Vec<String>,

    /// Secret keys (hex) of the validators this node signs for
    #[serde(default)]
    pub validator_keys: Vec<String>,

    /// Consensus timing parameters
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            chain_id: 1,
            data_dir: PathBuf::from("./cairn-data"),
            genesis_timestamp: 0,
            validators: Vec::new(),
            validator_keys: Vec::new(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validator_public_keys(&self) -> Result<Vec<PublicKey>> {
        self.validators
            .iter()
            .map(|s| PublicKey::from_hex(s).map_err(|e| anyhow::anyhow!("validator {}: {}", s, e)))
            .collect()
    }

    /// Local keypairs. Every key must belong to the validator set.
    pub fn local_keypairs(&self) -> Result<Vec<KeyPair>> {
        let validators = self.validator_public_keys()?;
        self.validator_keys
            .iter()
            .map(|s| {
                let keypair = KeyPair::from_secret(SecretKey::from_hex(s)?);
                if !validators.contains(&keypair.public) {
                    anyhow::bail!("key {} is not in the validator set", keypair.public);
                }
                Ok(keypair)
            })
            .collect()
    }
}

/// Sample configuration holding `validators` fresh keys, all signed for
/// locally
pub fn generate_sample_config(validators: usize) -> NodeConfig {
    let keys: Vec<KeyPair> = (0..validators).map(|_| KeyPair::generate()).collect();

    NodeConfig {
        genesis_timestamp: cairn_consensus::timestamp::now_ms(),
        validators: keys.iter().map(|k| k.public.to_hex()).collect(),
        validator_keys: keys.iter().map(|k| k.secret.to_hex()).collect(),
        ..Default::default()
    }
}
