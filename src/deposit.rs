use crate::params::Params;
use crate::sidechain::SidechainTable;
use crate::types::{self, Hash, SidechainNumber};
use crate::undo::Change;
use bitcoin::{BlockHash, OutPoint, PubkeyHash, Transaction};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A deposit into a sidechain, as included in a mainchain block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub sidechain: SidechainNumber,
    /// Sidechain address credited by the deposit.
    pub key_id: PubkeyHash,
    pub tx: Transaction,
    /// Index of the output holding the sidechain's funds.
    pub n: u32,
    pub block_hash: BlockHash,
}

impl Deposit {
    pub fn hash(&self) -> Hash {
        types::hash(self)
    }

    /// The CTIP this deposit creates.
    pub fn ctip(&self) -> Option<Ctip> {
        let output = self.tx.output.get(self.n as usize)?;
        Some(Ctip {
            outpoint: OutPoint::new(self.tx.txid(), self.n),
            amount: output.value,
        })
    }

    fn spends(&self, outpoint: &OutPoint) -> bool {
        self.tx.input.iter().any(|i| i.previous_output == *outpoint)
    }
}

impl std::fmt::Display for Deposit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "deposit to sidechain {} for {} ({}:{} in block {})",
            self.sidechain,
            self.key_id,
            self.tx.txid(),
            self.n,
            self.block_hash
        )
    }
}

/// Critical transaction index pair: the output currently holding all of a
/// sidechain's funds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ctip {
    pub outpoint: OutPoint,
    /// Satoshis.
    pub amount: u64,
}

impl Ctip {
    pub fn hash(&self) -> Hash {
        types::hash(self)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DepositRejection {
    #[error("sidechain {0} is not active")]
    InactiveSidechain(SidechainNumber),
    #[error("transaction has no output {0}")]
    MissingOutput(u32),
    #[error("output does not pay to the sidechain deposit script")]
    ScriptMismatch,
    #[error("deposit does not spend the current CTIP {expected}")]
    StaleCtip { expected: OutPoint },
    #[error("deposit of {amount} sat on top of {previous} sat does not cover the {fee} sat fee")]
    InsufficientAmount { previous: u64, amount: u64, fee: u64 },
    #[error("sidechain {0} already received a deposit in this block")]
    AlreadyDeposited(SidechainNumber),
    #[error("deposit claims to be included in block {0}")]
    WrongBlock(BlockHash),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepositOutcome {
    Applied(Ctip),
    Rejected(DepositRejection),
}

/// CTIP of every sidechain that has received funds, plus the deposit history
/// behind it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositLedger {
    ctips: BTreeMap<SidechainNumber, Ctip>,
    deposits: BTreeMap<SidechainNumber, Vec<Deposit>>,
}

impl DepositLedger {
    pub fn ctip(&self, sidechain: SidechainNumber) -> Option<&Ctip> {
        self.ctips.get(&sidechain)
    }

    pub fn ctips(&self) -> &BTreeMap<SidechainNumber, Ctip> {
        &self.ctips
    }

    pub fn deposits(&self, sidechain: SidechainNumber) -> &[Deposit] {
        self.deposits
            .get(&sidechain)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Validates `deposit` against the current CTIP. `deposited` holds the
    /// sidechains already credited in the block being connected.
    pub fn check(
        &self,
        deposit: &Deposit,
        sidechains: &SidechainTable,
        params: &Params,
        deposited: &BTreeSet<SidechainNumber>,
    ) -> Result<Ctip, DepositRejection> {
        let sidechain = sidechains
            .get(deposit.sidechain)
            .ok_or(DepositRejection::InactiveSidechain(deposit.sidechain))?;
        if deposited.contains(&deposit.sidechain) {
            return Err(DepositRejection::AlreadyDeposited(deposit.sidechain));
        }
        let output = deposit
            .tx
            .output
            .get(deposit.n as usize)
            .ok_or(DepositRejection::MissingOutput(deposit.n))?;
        if sidechain.deposit_script().as_ref() != Some(&output.script_pubkey) {
            return Err(DepositRejection::ScriptMismatch);
        }
        let previous = match self.ctips.get(&deposit.sidechain) {
            Some(ctip) if !deposit.spends(&ctip.outpoint) => {
                return Err(DepositRejection::StaleCtip {
                    expected: ctip.outpoint,
                })
            }
            Some(ctip) => ctip.amount,
            None => 0,
        };
        let insufficient = DepositRejection::InsufficientAmount {
            previous,
            amount: output.value,
            fee: params.deposit_fee,
        };
        let required = previous
            .checked_add(params.deposit_fee)
            .ok_or_else(|| insufficient.clone())?;
        if output.value < required {
            return Err(insufficient);
        }
        Ok(Ctip {
            outpoint: OutPoint::new(deposit.tx.txid(), deposit.n),
            amount: output.value,
        })
    }

    pub fn apply_deposit(
        &mut self,
        deposit: &Deposit,
        sidechains: &SidechainTable,
        params: &Params,
        deposited: &mut BTreeSet<SidechainNumber>,
        undo: &mut Vec<Change>,
    ) -> DepositOutcome {
        let ctip = match self.check(deposit, sidechains, params, deposited) {
            Ok(ctip) => ctip,
            Err(rejection) => return DepositOutcome::Rejected(rejection),
        };
        deposited.insert(deposit.sidechain);
        self.replace_ctip(deposit.sidechain, ctip, undo);
        self.deposits
            .entry(deposit.sidechain)
            .or_default()
            .push(deposit.clone());
        undo.push(Change::DepositAppended(deposit.sidechain));
        info!("{}, new CTIP {}:{}", deposit, ctip.outpoint, ctip.amount);
        DepositOutcome::Applied(ctip)
    }

    pub(crate) fn replace_ctip(
        &mut self,
        sidechain: SidechainNumber,
        ctip: Ctip,
        undo: &mut Vec<Change>,
    ) {
        undo.push(Change::CtipReplaced {
            sidechain,
            previous: self.ctips.insert(sidechain, ctip),
        });
    }

    pub(crate) fn set_ctip(&mut self, sidechain: SidechainNumber, ctip: Option<Ctip>) {
        match ctip {
            Some(ctip) => self.ctips.insert(sidechain, ctip),
            None => self.ctips.remove(&sidechain),
        };
    }

    pub(crate) fn pop_deposit(&mut self, sidechain: SidechainNumber) {
        if let Some(deposits) = self.deposits.get_mut(&sidechain) {
            deposits.pop();
            if deposits.is_empty() {
                self.deposits.remove(&sidechain);
            }
        }
    }
}
