use crate::activation::{ActivationReport, ProposalRegistry, SubmitOutcome};
use crate::deposit::{Ctip, Deposit, DepositLedger, DepositOutcome, DepositRejection};
use crate::error::Error;
use crate::params::Params;
use crate::proposal::{ActivationStatus, Proposal};
use crate::sidechain::{Sidechain, SidechainTable};
use crate::types::{self, ProposalId, ScdbHash, SidechainNumber, WtPrimeHash};
use crate::undo::{BlockUndo, Change};
use crate::vote::CustomVote;
use crate::withdrawal::{
    SpentLedger, SpentWtPrime, VotingReport, WtPrimeSpend, WtPrimeState, WtPrimeVoting,
};
use crate::{Validator, SSM};
use bitcoin::BlockHash;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The SCDB signals carried by one mainchain block, already extracted from
/// its coinbase and transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub block_hash: BlockHash,
    pub prev_block_hash: BlockHash,
    /// Snapshot hash of the SCDB after the previous block, if committed.
    pub scdb_commitment: Option<ScdbHash>,
    /// Proposal commitments, new or renewing.
    pub proposals: Vec<Proposal>,
    /// Newly observed WT^s.
    pub wt_primes: Vec<(SidechainNumber, WtPrimeHash)>,
    pub votes: Vec<CustomVote>,
    pub deposits: Vec<Deposit>,
    /// WT^ payouts included in this block.
    pub spends: Vec<WtPrimeSpend>,
}

impl BlockUpdate {
    pub fn new(block_hash: BlockHash, prev_block_hash: BlockHash) -> Self {
        Self {
            block_hash,
            prev_block_hash,
            scdb_commitment: None,
            proposals: vec![],
            wt_primes: vec![],
            votes: vec![],
            deposits: vec![],
            spends: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockReport {
    /// Outcome for every proposal that was not already pending.
    pub submissions: Vec<SubmitOutcome>,
    pub activation: ActivationReport,
    pub tracked: Vec<(SidechainNumber, WtPrimeHash)>,
    pub voting: VotingReport,
    /// CTIPs moved by deposits, then by WT^ payouts.
    pub ctips: Vec<(SidechainNumber, Ctip)>,
    /// Snapshot hash after the block, to be committed to by its successor.
    pub snapshot: ScdbHash,
}

#[derive(Clone, Debug)]
pub struct ConnectedBlock {
    pub undo: BlockUndo,
    pub report: BlockReport,
}

/// Sidechain DB: the consensus state of every proposal, sidechain, WT^ and
/// CTIP as of the current tip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scdb {
    params: Params,
    tip: Option<BlockHash>,
    height: u32,
    registry: ProposalRegistry,
    sidechains: SidechainTable,
    voting: WtPrimeVoting,
    deposits: DepositLedger,
    spent: SpentLedger,
}

impl Scdb {
    pub fn new(params: Params) -> Result<Self, Error> {
        params.validate()?;
        Ok(Self {
            params,
            tip: None,
            height: 0,
            registry: ProposalRegistry::default(),
            sidechains: SidechainTable::default(),
            voting: WtPrimeVoting::default(),
            deposits: DepositLedger::default(),
            spent: SpentLedger::default(),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn tip(&self) -> Option<BlockHash> {
        self.tip
    }

    /// Number of connected blocks.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn activation_status(&self, id: &ProposalId) -> Option<&ActivationStatus> {
        self.registry.get(id)
    }

    pub fn activation_statuses(&self) -> impl Iterator<Item = &ActivationStatus> {
        self.registry.iter()
    }

    pub fn sidechain(&self, number: SidechainNumber) -> Option<&Sidechain> {
        self.sidechains.get(number)
    }

    pub fn sidechains(&self) -> impl Iterator<Item = &Sidechain> {
        self.sidechains.iter()
    }

    pub fn wt_prime_state(
        &self,
        sidechain: SidechainNumber,
        wt_prime: &WtPrimeHash,
    ) -> Option<&WtPrimeState> {
        self.voting.get(sidechain, wt_prime)
    }

    pub fn wt_prime_states(&self) -> impl Iterator<Item = &WtPrimeState> {
        self.voting.iter()
    }

    pub fn confirmed_wt_prime(&self, sidechain: SidechainNumber) -> Option<&WtPrimeHash> {
        self.voting.confirmed(sidechain)
    }

    /// Voting state of the confirmed WT^, counting down to its lapse.
    pub fn confirmed_wt_prime_state(&self, sidechain: SidechainNumber) -> Option<&WtPrimeState> {
        self.voting.confirmed_state(sidechain)
    }

    pub fn ctip(&self, sidechain: SidechainNumber) -> Option<&Ctip> {
        self.deposits.ctip(sidechain)
    }

    pub fn deposits(&self, sidechain: SidechainNumber) -> &[Deposit] {
        self.deposits.deposits(sidechain)
    }

    pub fn spent_wt_primes(&self) -> impl Iterator<Item = &SpentWtPrime> {
        self.spent.iter()
    }

    pub fn is_spent(&self, sidechain: SidechainNumber, wt_prime: &WtPrimeHash) -> bool {
        self.spent.is_spent(sidechain, wt_prime)
    }

    /// Hash of the consensus state, excluding the tip and deposit history.
    pub fn snapshot_hash(&self) -> ScdbHash {
        types::hash(&(
            &self.registry,
            &self.sidechains,
            &self.voting,
            self.deposits.ctips(),
            &self.spent,
        ))
        .into()
    }

    pub fn check_commitment(&self, committed: ScdbHash) -> Result<(), Error> {
        let local = self.snapshot_hash();
        if committed != local {
            return Err(Error::CommitmentMismatch { committed, local });
        }
        Ok(())
    }

    /// Applies `block` on top of the tip. On error the state is left exactly
    /// as it was.
    pub fn connect_block(&mut self, block: &BlockUpdate) -> Result<ConnectedBlock, Error> {
        if let Some(tip) = self.tip {
            if block.prev_block_hash != tip {
                return Err(Error::UnexpectedParent {
                    block: block.block_hash,
                    tip,
                });
            }
        }
        if let Some(committed) = block.scdb_commitment {
            self.check_commitment(committed)?;
        }
        let mut changes = Vec::new();
        match self.apply_block(block, &mut changes) {
            Ok(report) => {
                debug!(
                    "connected block {} at height {}, SCDB {}",
                    block.block_hash, self.height, report.snapshot
                );
                Ok(ConnectedBlock {
                    undo: BlockUndo {
                        block_hash: block.block_hash,
                        changes,
                    },
                    report,
                })
            }
            Err(err) => {
                info!("rejected block {}: {}", block.block_hash, err);
                self.rollback(changes);
                Err(err)
            }
        }
    }

    /// Reverts the tip block.
    pub fn disconnect_block(&mut self, undo: BlockUndo) -> Result<(), Error> {
        if self.tip != Some(undo.block_hash) {
            return Err(Error::NotTip(undo.block_hash));
        }
        self.rollback(undo.changes);
        debug!("disconnected block {}", undo.block_hash);
        Ok(())
    }

    /// Connects `block` to a copy of the state and returns the resulting
    /// snapshot hash. The canonical state is not touched.
    pub fn validate_block(&self, block: &BlockUpdate) -> Result<ScdbHash, Error> {
        let mut scratch = self.clone();
        let connected = scratch.connect_block(block)?;
        Ok(connected.report.snapshot)
    }

    fn apply_block(
        &mut self,
        block: &BlockUpdate,
        changes: &mut Vec<Change>,
    ) -> Result<BlockReport, Error> {
        let mut renewed = BTreeSet::new();
        let mut fresh = BTreeSet::new();
        let mut submissions = Vec::new();
        for proposal in &block.proposals {
            let id = proposal.id();
            if self.registry.contains(&id) {
                renewed.insert(id);
                continue;
            }
            let outcome =
                self.registry
                    .submit(proposal.clone(), &self.sidechains, &self.params, changes);
            if let SubmitOutcome::Accepted(id) = outcome {
                fresh.insert(id);
            }
            submissions.push(outcome);
        }
        let activation = self.registry.advance(
            &renewed,
            &fresh,
            &mut self.sidechains,
            &self.params,
            changes,
        );

        let mut tracked = Vec::new();
        for &(sidechain, wt_prime) in &block.wt_primes {
            if self.voting.track(
                sidechain,
                wt_prime,
                &self.sidechains,
                &self.spent,
                &self.params,
                changes,
            ) {
                tracked.push((sidechain, wt_prime));
            }
        }
        let fresh: BTreeSet<_> = tracked.iter().copied().collect();
        let voting = self
            .voting
            .apply_votes(&block.votes, &fresh, &self.params, changes);

        let mut deposited = BTreeSet::new();
        let mut ctips = Vec::new();
        for deposit in &block.deposits {
            let outcome = if deposit.block_hash != block.block_hash {
                DepositOutcome::Rejected(DepositRejection::WrongBlock(deposit.block_hash))
            } else {
                self.deposits.apply_deposit(
                    deposit,
                    &self.sidechains,
                    &self.params,
                    &mut deposited,
                    changes,
                )
            };
            match outcome {
                DepositOutcome::Applied(ctip) => ctips.push((deposit.sidechain, ctip)),
                DepositOutcome::Rejected(reason) => {
                    return Err(Error::InvalidDeposit {
                        sidechain: deposit.sidechain,
                        reason,
                    })
                }
            }
        }

        for spend in &block.spends {
            let ctip = self.spent.record_spend(
                spend,
                block.block_hash,
                &self.sidechains,
                &mut self.voting,
                &mut self.deposits,
                changes,
            )?;
            ctips.push((spend.sidechain, ctip));
        }

        changes.push(Change::Tip {
            tip: self.tip,
            height: self.height,
        });
        self.tip = Some(block.block_hash);
        self.height += 1;

        Ok(BlockReport {
            submissions,
            activation,
            tracked,
            voting,
            ctips,
            snapshot: self.snapshot_hash(),
        })
    }

    fn rollback(&mut self, changes: Vec<Change>) {
        for change in changes.into_iter().rev() {
            match change {
                Change::StatusAdded(id) => {
                    self.registry.remove(&id);
                }
                Change::StatusRemoved(status) => self.registry.insert(status),
                Change::StatusCounters {
                    id,
                    age,
                    fail,
                    renewals,
                } => self.registry.set_counters(&id, age, fail, renewals),
                Change::SidechainActivated(number) => {
                    self.sidechains.remove(number);
                }
                Change::WtPrimeAdded(sidechain, wt_prime) => {
                    self.voting.remove(sidechain, &wt_prime)
                }
                Change::WtPrimeRemoved(state) => self.voting.insert(state),
                Change::WtPrimeCounters {
                    sidechain,
                    wt_prime,
                    blocks_left,
                    workscore,
                } => self
                    .voting
                    .set_counters(sidechain, &wt_prime, blocks_left, workscore),
                Change::Confirmed {
                    sidechain,
                    previous,
                } => self.voting.set_confirmed(sidechain, previous),
                Change::CtipReplaced {
                    sidechain,
                    previous,
                } => self.deposits.set_ctip(sidechain, previous),
                Change::DepositAppended(sidechain) => self.deposits.pop_deposit(sidechain),
                Change::SpendRecorded => self.spent.pop(),
                Change::Tip { tip, height } => {
                    self.tip = tip;
                    self.height = height;
                }
            }
        }
    }
}

impl SSM for Scdb {
    type Block = BlockUpdate;
    type Undo = BlockUndo;
    type Error = Error;

    fn connect(&mut self, block: &BlockUpdate) -> Result<BlockUndo, Error> {
        self.connect_block(block).map(|connected| connected.undo)
    }

    fn disconnect(&mut self, undo: BlockUndo) -> Result<(), Error> {
        self.disconnect_block(undo)
    }
}

impl Validator for Scdb {
    type State = Scdb;
    type Error = Error;

    fn validate(&self, block: &BlockUpdate) -> Result<(), Error> {
        self.validate_block(block).map(|_| ())
    }
}
