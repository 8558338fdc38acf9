pub mod block;
pub mod commit;
pub mod message;
pub mod validator;

pub use block::{Block, BlockHeader};
pub use commit::{AggregatedSignature, Commit, CommitProof};
pub use message::{MessageType, Precommit, Prevote, Proposal, SignatureMessageData};
pub use validator::Validator;
