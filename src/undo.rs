use crate::deposit::Ctip;
use crate::proposal::ActivationStatus;
use crate::types::{ProposalId, SidechainNumber, WtPrimeHash};
use crate::withdrawal::WtPrimeState;
use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

/// One mutation of the SCDB, holding what is needed to revert it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    StatusAdded(ProposalId),
    StatusRemoved(ActivationStatus),
    StatusCounters {
        id: ProposalId,
        age: u16,
        fail: u16,
        renewals: u16,
    },
    SidechainActivated(SidechainNumber),
    WtPrimeAdded(SidechainNumber, WtPrimeHash),
    WtPrimeRemoved(WtPrimeState),
    WtPrimeCounters {
        sidechain: SidechainNumber,
        wt_prime: WtPrimeHash,
        blocks_left: u16,
        workscore: u16,
    },
    Confirmed {
        sidechain: SidechainNumber,
        previous: Option<WtPrimeState>,
    },
    CtipReplaced {
        sidechain: SidechainNumber,
        previous: Option<Ctip>,
    },
    DepositAppended(SidechainNumber),
    SpendRecorded,
    Tip {
        tip: Option<BlockHash>,
        height: u32,
    },
}

/// Everything a connected block changed, in application order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub block_hash: BlockHash,
    pub changes: Vec<Change>,
}
