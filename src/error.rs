use crate::deposit::DepositRejection;
use crate::types::{ScdbHash, SidechainNumber};
use crate::withdrawal::SpendError;
use bitcoin::BlockHash;

/// Failures that make a block invalid or an operation impossible.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("block {block} does not build on the current tip {tip}")]
    UnexpectedParent { block: BlockHash, tip: BlockHash },
    #[error("SCDB commitment {committed} does not match local state {local}")]
    CommitmentMismatch { committed: ScdbHash, local: ScdbHash },
    #[error("invalid deposit to sidechain {sidechain}")]
    InvalidDeposit {
        sidechain: SidechainNumber,
        #[source]
        reason: DepositRejection,
    },
    #[error("invalid WT^ spend")]
    Spend(#[from] SpendError),
    #[error("block {0} is not the current tip")]
    NotTip(BlockHash),
    #[error("invalid consensus parameters")]
    Params(#[from] crate::params::Error),
}
