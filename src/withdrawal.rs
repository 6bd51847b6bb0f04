use crate::deposit::{Ctip, DepositLedger};
use crate::params::Params;
use crate::sidechain::{Sidechain, SidechainTable};
use crate::types::{self, Hash, SidechainNumber, WtPrimeHash};
use crate::undo::Change;
use crate::vote::{CustomVote, Vote};
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash as _;
use bitcoin::{BlockHash, OutPoint, Transaction, TxIn};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// WT^ id of a withdrawal bundle: the txid once the CTIP input is replaced
/// by a bare `OP_0` input and the trailing sidechain change output is
/// dropped. `None` if the transaction has no inputs or no outputs.
pub fn blinded_wt_prime_hash(tx: &Transaction) -> Option<WtPrimeHash> {
    if tx.input.is_empty() || tx.output.is_empty() {
        return None;
    }
    let mut blinded = tx.clone();
    blinded.input = vec![TxIn {
        script_sig: Builder::new().push_int(0).into_script(),
        ..TxIn::default()
    }];
    blinded.output.pop();
    Some(WtPrimeHash::from(blinded.txid().into_inner()))
}

/// Voting state of one WT^.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WtPrimeState {
    pub sidechain: SidechainNumber,
    pub blocks_left: u16,
    pub workscore: u16,
    pub wt_prime: WtPrimeHash,
}

impl WtPrimeState {
    pub fn new(sidechain: SidechainNumber, wt_prime: WtPrimeHash, params: &Params) -> Self {
        Self {
            sidechain,
            blocks_left: params.verification_period,
            workscore: 0,
            wt_prime,
        }
    }

    pub fn hash(&self) -> Hash {
        types::hash(self)
    }

    /// Upvotes never push the workscore above the number of blocks elapsed
    /// in the verification period.
    fn apply(&mut self, vote: Vote, verification_period: u16) {
        match vote {
            Vote::Upvote => {
                let elapsed = verification_period.saturating_sub(self.blocks_left);
                self.workscore = self.workscore.saturating_add(1).min(elapsed);
            }
            Vote::Downvote => self.workscore = self.workscore.saturating_sub(1),
            Vote::Abstain => {}
        }
    }
}

impl std::fmt::Display for WtPrimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WT^ {} of sidechain {} (workscore {}, {} blocks left)",
            self.wt_prime, self.sidechain, self.workscore, self.blocks_left
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VotingReport {
    /// Final states of the bundles that confirmed in this block.
    pub confirmed: Vec<WtPrimeState>,
    pub expired: Vec<WtPrimeState>,
    /// Dropped because another bundle of the same sidechain confirmed.
    pub invalidated: Vec<WtPrimeState>,
    /// Confirmed bundles whose verification period ended before payout.
    pub lapsed: Vec<WtPrimeState>,
}

/// WT^s being voted on, and the confirmed bundle of each sidechain that has
/// not been spent yet. A confirmed bundle keeps counting down and lapses
/// when its verification period ends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WtPrimeVoting {
    states: BTreeMap<(SidechainNumber, WtPrimeHash), WtPrimeState>,
    confirmed: BTreeMap<SidechainNumber, WtPrimeState>,
}

impl WtPrimeVoting {
    pub fn get(&self, sidechain: SidechainNumber, wt_prime: &WtPrimeHash) -> Option<&WtPrimeState> {
        self.states.get(&(sidechain, *wt_prime))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WtPrimeState> {
        self.states.values()
    }

    /// The confirmed, spendable WT^ of a sidechain.
    pub fn confirmed(&self, sidechain: SidechainNumber) -> Option<&WtPrimeHash> {
        self.confirmed.get(&sidechain).map(|state| &state.wt_prime)
    }

    pub fn confirmed_state(&self, sidechain: SidechainNumber) -> Option<&WtPrimeState> {
        self.confirmed.get(&sidechain)
    }

    /// Starts voting on a newly observed WT^. Returns false if it was
    /// ignored: unknown sidechain, already tracked or spent, or the
    /// sidechain already has a confirmed bundle waiting to be spent.
    pub fn track(
        &mut self,
        sidechain: SidechainNumber,
        wt_prime: WtPrimeHash,
        sidechains: &SidechainTable,
        spent: &SpentLedger,
        params: &Params,
        undo: &mut Vec<Change>,
    ) -> bool {
        let key = (sidechain, wt_prime);
        if !sidechains.is_active(sidechain)
            || self.states.contains_key(&key)
            || self.confirmed.contains_key(&sidechain)
            || spent.is_spent(sidechain, &wt_prime)
        {
            debug!("ignoring WT^ {} for sidechain {}", wt_prime, sidechain);
            return false;
        }
        self.states
            .insert(key, WtPrimeState::new(sidechain, wt_prime, params));
        undo.push(Change::WtPrimeAdded(sidechain, wt_prime));
        true
    }

    /// Applies one block's votes to every tracked WT^ not in `fresh`.
    pub fn apply_votes(
        &mut self,
        votes: &[CustomVote],
        fresh: &BTreeSet<(SidechainNumber, WtPrimeHash)>,
        params: &Params,
        undo: &mut Vec<Change>,
    ) -> VotingReport {
        let mut report = VotingReport::default();
        let sidechains: Vec<_> = self.confirmed.keys().copied().collect();
        for sidechain in sidechains {
            let Some(state) = self.confirmed.get_mut(&sidechain) else {
                continue;
            };
            undo.push(Change::Confirmed {
                sidechain,
                previous: Some(state.clone()),
            });
            state.blocks_left = state.blocks_left.saturating_sub(1);
            if state.blocks_left == 0 {
                if let Some(state) = self.confirmed.remove(&sidechain) {
                    info!("confirmation lapsed for {}", state);
                    report.lapsed.push(state);
                }
            }
        }

        let mut custom = BTreeMap::new();
        for vote in votes {
            let key = (vote.sidechain, vote.wt_prime);
            if self.states.contains_key(&key) {
                custom.insert(key, vote.vote);
            } else {
                debug!(
                    "ignoring vote for unknown WT^ {} of sidechain {}",
                    vote.wt_prime, vote.sidechain
                );
            }
        }

        let mut expired = Vec::new();
        let mut confirmed = Vec::new();
        for (key, state) in self.states.iter_mut() {
            if fresh.contains(key) {
                continue;
            }
            undo.push(Change::WtPrimeCounters {
                sidechain: state.sidechain,
                wt_prime: state.wt_prime,
                blocks_left: state.blocks_left,
                workscore: state.workscore,
            });
            state.blocks_left = state.blocks_left.saturating_sub(1);
            if state.blocks_left == 0 {
                expired.push(*key);
                continue;
            }
            let vote = custom.get(key).copied().unwrap_or(params.default_vote);
            state.apply(vote, params.verification_period);
            if state.workscore >= params.min_workscore {
                confirmed.push(*key);
            }
        }

        for key in expired {
            if let Some(state) = self.states.remove(&key) {
                info!("expired {}", state);
                undo.push(Change::WtPrimeRemoved(state.clone()));
                report.expired.push(state);
            }
        }
        // Ties within a block go to the lowest WT^ hash.
        for (sidechain, wt_prime) in confirmed {
            let Some(state) = self.states.remove(&(sidechain, wt_prime)) else {
                continue;
            };
            info!("confirmed {}", state);
            undo.push(Change::WtPrimeRemoved(state.clone()));
            undo.push(Change::Confirmed {
                sidechain,
                previous: self.confirmed.insert(sidechain, state.clone()),
            });
            report.confirmed.push(state);

            let first = (sidechain, WtPrimeHash::from([0; 32]));
            let last = (sidechain, WtPrimeHash::from([0xff; 32]));
            let losers: Vec<_> = self.states.range(first..=last).map(|(key, _)| *key).collect();
            for key in losers {
                if let Some(state) = self.states.remove(&key) {
                    debug!("invalidated {}", state);
                    undo.push(Change::WtPrimeRemoved(state.clone()));
                    report.invalidated.push(state);
                }
            }
        }
        report
    }

    pub(crate) fn take_confirmed(
        &mut self,
        sidechain: SidechainNumber,
        undo: &mut Vec<Change>,
    ) -> Option<WtPrimeHash> {
        let previous = self.confirmed.remove(&sidechain)?;
        let wt_prime = previous.wt_prime;
        undo.push(Change::Confirmed {
            sidechain,
            previous: Some(previous),
        });
        Some(wt_prime)
    }

    pub(crate) fn insert(&mut self, state: WtPrimeState) {
        self.states.insert((state.sidechain, state.wt_prime), state);
    }

    pub(crate) fn remove(&mut self, sidechain: SidechainNumber, wt_prime: &WtPrimeHash) {
        self.states.remove(&(sidechain, *wt_prime));
    }

    pub(crate) fn set_counters(
        &mut self,
        sidechain: SidechainNumber,
        wt_prime: &WtPrimeHash,
        blocks_left: u16,
        workscore: u16,
    ) {
        if let Some(state) = self.states.get_mut(&(sidechain, *wt_prime)) {
            state.blocks_left = blocks_left;
            state.workscore = workscore;
        }
    }

    pub(crate) fn set_confirmed(&mut self, sidechain: SidechainNumber, state: Option<WtPrimeState>) {
        match state {
            Some(state) => self.confirmed.insert(sidechain, state),
            None => self.confirmed.remove(&sidechain),
        };
    }
}

/// A WT^ payout transaction included in a block. It spends the sidechain's
/// CTIP and its last output is the change that becomes the new CTIP.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WtPrimeSpend {
    pub sidechain: SidechainNumber,
    pub tx: Transaction,
}

impl WtPrimeSpend {
    pub fn wt_prime(&self) -> Option<WtPrimeHash> {
        blinded_wt_prime_hash(&self.tx)
    }

    /// The CTIP left behind by the payout.
    pub fn change(&self) -> Option<Ctip> {
        let (n, output) = self.tx.output.iter().enumerate().last()?;
        Some(Ctip {
            outpoint: OutPoint::new(self.tx.txid(), n as u32),
            amount: output.value,
        })
    }
}

/// Record that a WT^ has paid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentWtPrime {
    pub sidechain: SidechainNumber,
    pub wt_prime: WtPrimeHash,
    pub block_hash: BlockHash,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SpendError {
    #[error("transaction paying out of sidechain {0} has no WT^ hash")]
    NotAWithdrawal(SidechainNumber),
    #[error("WT^ {wt_prime} of sidechain {sidechain} was already spent")]
    DoubleSpend {
        sidechain: SidechainNumber,
        wt_prime: WtPrimeHash,
    },
    #[error("WT^ {wt_prime} of sidechain {sidechain} is not confirmed")]
    NotConfirmed {
        sidechain: SidechainNumber,
        wt_prime: WtPrimeHash,
    },
    #[error("sidechain {0} has no CTIP to pay out of")]
    NoCtip(SidechainNumber),
    #[error("WT^ of sidechain {sidechain} does not spend the current CTIP {expected}")]
    StaleCtip {
        sidechain: SidechainNumber,
        expected: OutPoint,
    },
    #[error("WT^ change does not pay back to sidechain {0}")]
    ChangeScriptMismatch(SidechainNumber),
}

/// Append-only list of paid out WT^s.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentLedger {
    spent: Vec<SpentWtPrime>,
    index: BTreeSet<(SidechainNumber, WtPrimeHash)>,
}

impl SpentLedger {
    pub fn is_spent(&self, sidechain: SidechainNumber, wt_prime: &WtPrimeHash) -> bool {
        self.index.contains(&(sidechain, *wt_prime))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpentWtPrime> {
        self.spent.iter()
    }

    pub fn len(&self) -> usize {
        self.spent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }

    /// Records the payout of the confirmed WT^ of a sidechain, consuming its
    /// confirmation and moving the CTIP to the payout's change output.
    pub fn record_spend(
        &mut self,
        spend: &WtPrimeSpend,
        block_hash: BlockHash,
        sidechains: &SidechainTable,
        voting: &mut WtPrimeVoting,
        deposits: &mut DepositLedger,
        undo: &mut Vec<Change>,
    ) -> Result<Ctip, SpendError> {
        let sidechain = spend.sidechain;
        let (wt_prime, change) = match (spend.wt_prime(), spend.change()) {
            (Some(wt_prime), Some(change)) => (wt_prime, change),
            _ => return Err(SpendError::NotAWithdrawal(sidechain)),
        };
        if self.is_spent(sidechain, &wt_prime) {
            return Err(SpendError::DoubleSpend {
                sidechain,
                wt_prime,
            });
        }
        if voting.confirmed(sidechain) != Some(&wt_prime) {
            return Err(SpendError::NotConfirmed {
                sidechain,
                wt_prime,
            });
        }
        let expected = deposits
            .ctip(sidechain)
            .ok_or(SpendError::NoCtip(sidechain))?
            .outpoint;
        if !spend.tx.input.iter().any(|i| i.previous_output == expected) {
            return Err(SpendError::StaleCtip {
                sidechain,
                expected,
            });
        }
        let change_script = spend.tx.output.last().map(|output| &output.script_pubkey);
        let deposit_script = sidechains.get(sidechain).and_then(Sidechain::deposit_script);
        if deposit_script.as_ref() != change_script {
            return Err(SpendError::ChangeScriptMismatch(sidechain));
        }

        voting.take_confirmed(sidechain, undo);
        deposits.replace_ctip(sidechain, change, undo);
        self.index.insert((sidechain, wt_prime));
        self.spent.push(SpentWtPrime {
            sidechain,
            wt_prime,
            block_hash,
        });
        undo.push(Change::SpendRecorded);
        info!(
            "WT^ {} of sidechain {} spent in {}, new CTIP {}:{}",
            wt_prime, sidechain, block_hash, change.outpoint, change.amount
        );
        Ok(change)
    }

    pub(crate) fn pop(&mut self) {
        if let Some(spent) = self.spent.pop() {
            self.index.remove(&(spent.sidechain, spent.wt_prime));
        }
    }
}
