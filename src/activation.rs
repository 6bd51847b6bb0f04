use crate::params::Params;
use crate::proposal::{ActivationStatus, Proposal};
use crate::sidechain::{Sidechain, SidechainTable};
use crate::types::{ProposalId, SidechainNumber};
use crate::undo::Change;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(ProposalId),
    DuplicateIgnored,
    CapacityExceeded,
}

/// Why a pending proposal left the registry without activating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    TooManyFailures,
    TooOld,
    NoFreeSlot,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub promoted: Vec<(ProposalId, SidechainNumber)>,
    pub rejected: Vec<(ProposalId, Rejection)>,
}

enum Verdict {
    Keep,
    Discard(Rejection),
    Promote,
}

/// Proposals signaled for activation, keyed by proposal hash.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRegistry {
    statuses: BTreeMap<ProposalId, ActivationStatus>,
}

impl ProposalRegistry {
    pub fn get(&self, id: &ProposalId) -> Option<&ActivationStatus> {
        self.statuses.get(id)
    }

    pub fn contains(&self, id: &ProposalId) -> bool {
        self.statuses.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivationStatus> {
        self.statuses.values()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn submit(
        &mut self,
        proposal: Proposal,
        sidechains: &SidechainTable,
        params: &Params,
        undo: &mut Vec<Change>,
    ) -> SubmitOutcome {
        let id = proposal.id();
        if self.statuses.contains_key(&id) || sidechains.contains_proposal(&proposal) {
            debug!("ignoring duplicate sidechain proposal {}", id);
            return SubmitOutcome::DuplicateIgnored;
        }
        if self.statuses.len() >= params.activation_max_signals {
            debug!("activation registry full, dropping proposal {}", id);
            return SubmitOutcome::CapacityExceeded;
        }
        self.statuses.insert(id, ActivationStatus::new(proposal));
        undo.push(Change::StatusAdded(id));
        SubmitOutcome::Accepted(id)
    }

    /// Ages every tracked status by one block, then discards or promotes.
    /// Statuses in `fresh` were created by the block being connected and
    /// are left at age 0.
    pub fn advance(
        &mut self,
        renewed: &BTreeSet<ProposalId>,
        fresh: &BTreeSet<ProposalId>,
        sidechains: &mut SidechainTable,
        params: &Params,
        undo: &mut Vec<Change>,
    ) -> ActivationReport {
        let mut verdicts = Vec::new();
        for (id, status) in self.statuses.iter_mut() {
            if fresh.contains(id) {
                continue;
            }
            undo.push(Change::StatusCounters {
                id: *id,
                age: status.age,
                fail: status.fail,
                renewals: status.renewals,
            });
            status.age = status.age.saturating_add(1);
            if renewed.contains(id) {
                status.fail = 0;
                status.renewals = status.renewals.saturating_add(1);
            } else {
                status.fail = status.fail.saturating_add(1);
            }
            let verdict = if status.fail > params.activation_max_failures {
                Verdict::Discard(Rejection::TooManyFailures)
            } else if status.age > params.activation_max_age {
                Verdict::Discard(Rejection::TooOld)
            } else if status.weight() >= params.activation_threshold {
                Verdict::Promote
            } else {
                Verdict::Keep
            };
            verdicts.push((*id, verdict));
        }

        let mut report = ActivationReport::default();
        for (id, verdict) in verdicts {
            let rejection = match verdict {
                Verdict::Keep => continue,
                Verdict::Discard(rejection) => Some(rejection),
                Verdict::Promote => match sidechains.free_slot(params.activation_max_active) {
                    Some(slot) => {
                        if let Some(status) = self.statuses.get(&id) {
                            let sidechain = Sidechain::new(slot, &status.proposal);
                            info!("activated {}", sidechain);
                            sidechains.insert(sidechain);
                            undo.push(Change::SidechainActivated(slot));
                            report.promoted.push((id, slot));
                        }
                        None
                    }
                    None => Some(Rejection::NoFreeSlot),
                },
            };
            if let Some(rejection) = rejection {
                info!("rejected sidechain proposal {}: {:?}", id, rejection);
                report.rejected.push((id, rejection));
            }
            if let Some(status) = self.statuses.remove(&id) {
                undo.push(Change::StatusRemoved(status));
            }
        }
        report
    }

    pub(crate) fn insert(&mut self, status: ActivationStatus) {
        self.statuses.insert(status.id(), status);
    }

    pub(crate) fn remove(&mut self, id: &ProposalId) -> Option<ActivationStatus> {
        self.statuses.remove(id)
    }

    pub(crate) fn set_counters(&mut self, id: &ProposalId, age: u16, fail: u16, renewals: u16) {
        if let Some(status) = self.statuses.get_mut(id) {
            status.age = age;
            status.fail = fail;
            status.renewals = renewals;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn proposal(n: u32) -> Proposal {
        Proposal {
            title: format!("sidechain {}", n),
            script_hex: "51".into(),
            ..Proposal::default()
        }
    }

    fn none() -> BTreeSet<ProposalId> {
        BTreeSet::new()
    }

    #[test]
    fn submit_dedups_and_caps() {
        let params = Params::default();
        let sidechains = SidechainTable::default();
        let mut registry = ProposalRegistry::default();
        let mut undo = vec![];

        let id = proposal(0).id();
        assert_eq!(
            registry.submit(proposal(0), &sidechains, &params, &mut undo),
            SubmitOutcome::Accepted(id)
        );
        assert_eq!(
            registry.submit(proposal(0), &sidechains, &params, &mut undo),
            SubmitOutcome::DuplicateIgnored
        );
        for n in 1..40 {
            registry.submit(proposal(n), &sidechains, &params, &mut undo);
        }
        assert_eq!(registry.len(), params.activation_max_signals);
        assert_eq!(
            registry.submit(proposal(99), &sidechains, &params, &mut undo),
            SubmitOutcome::CapacityExceeded
        );
        assert_eq!(undo.len(), params.activation_max_signals);
    }

    #[test]
    fn active_sidechains_cannot_be_proposed_again() {
        let params = Params::default();
        let mut sidechains = SidechainTable::default();
        sidechains.insert(Sidechain::new(0, &proposal(0)));
        let mut registry = ProposalRegistry::default();
        assert_eq!(
            registry.submit(proposal(0), &sidechains, &params, &mut vec![]),
            SubmitOutcome::DuplicateIgnored
        );
    }

    #[test]
    fn renewed_proposal_keeps_activating() {
        let params = Params::default();
        let mut sidechains = SidechainTable::default();
        let mut registry = ProposalRegistry::default();
        let mut undo = vec![];
        let id = proposal(0).id();
        registry.submit(proposal(0), &sidechains, &params, &mut undo);

        let renewed: BTreeSet<_> = [id].into_iter().collect();
        for _ in 0..16 {
            let report = registry.advance(&renewed, &none(), &mut sidechains, &params, &mut undo);
            assert_eq!(report, ActivationReport::default());
        }
        let status = registry.get(&id).unwrap();
        assert_eq!((status.age, status.fail, status.renewals), (16, 0, 16));
        assert!(sidechains.is_empty());
    }

    #[test]
    fn sparse_renewals_do_not_activate() {
        let params = Params::default();
        let mut sidechains = SidechainTable::default();
        let mut registry = ProposalRegistry::default();
        let id = proposal(0).id();
        registry.submit(proposal(0), &sidechains, &params, &mut vec![]);

        for age in 1..=64u16 {
            let renewed: BTreeSet<_> = if age % 32 == 0 {
                [id].into_iter().collect()
            } else {
                BTreeSet::new()
            };
            let report = registry.advance(&renewed, &none(), &mut sidechains, &params, &mut vec![]);
            assert!(report.promoted.is_empty());
        }
        let status = registry.get(&id).unwrap();
        assert_eq!((status.age, status.fail, status.renewals), (64, 0, 2));
        let report = registry.advance(&none(), &none(), &mut sidechains, &params, &mut vec![]);
        assert_eq!(report.rejected, vec![(id, Rejection::TooOld)]);
        assert!(sidechains.is_empty());
    }

    #[test]
    fn failures_beyond_the_limit_discard() {
        let params = Params::default();
        let mut sidechains = SidechainTable::default();
        let mut registry = ProposalRegistry::default();
        let id = proposal(0).id();
        registry.submit(proposal(0), &sidechains, &params, &mut vec![]);

        for _ in 0..32 {
            registry.advance(&none(), &none(), &mut sidechains, &params, &mut vec![]);
        }
        assert_eq!(registry.get(&id).unwrap().fail, 32);
        let report = registry.advance(&none(), &none(), &mut sidechains, &params, &mut vec![]);
        assert_eq!(report.rejected, vec![(id, Rejection::TooManyFailures)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn age_beyond_the_limit_discards() {
        // Threshold out of reach so only the age bound applies.
        let params = Params {
            activation_threshold: 1_000,
            ..Params::default()
        };
        let mut sidechains = SidechainTable::default();
        let mut registry = ProposalRegistry::default();
        let id = proposal(0).id();
        registry.submit(proposal(0), &sidechains, &params, &mut vec![]);
        let renewed: BTreeSet<_> = [id].into_iter().collect();

        for _ in 0..64 {
            registry.advance(&renewed, &none(), &mut sidechains, &params, &mut vec![]);
        }
        assert_eq!(registry.get(&id).unwrap().age, 64);
        let report = registry.advance(&renewed, &none(), &mut sidechains, &params, &mut vec![]);
        assert_eq!(report.rejected, vec![(id, Rejection::TooOld)]);
    }

    #[test]
    fn promotion_at_threshold_takes_lowest_slot() {
        let params = Params {
            activation_threshold: 4,
            ..Params::default()
        };
        let mut sidechains = SidechainTable::default();
        sidechains.insert(Sidechain::new(0, &proposal(100)));
        let mut registry = ProposalRegistry::default();
        let id = proposal(0).id();
        registry.submit(proposal(0), &sidechains, &params, &mut vec![]);
        let renewed: BTreeSet<_> = [id].into_iter().collect();

        for _ in 0..3 {
            registry.advance(&renewed, &none(), &mut sidechains, &params, &mut vec![]);
        }
        let report = registry.advance(&renewed, &none(), &mut sidechains, &params, &mut vec![]);
        assert_eq!(report.promoted, vec![(id, 1)]);
        assert!(registry.is_empty());
        assert!(sidechains.get(1).unwrap().matches(&proposal(0)));
    }

    #[test]
    fn promotion_without_free_slot_discards() {
        let params = Params {
            activation_threshold: 1,
            activation_max_active: 1,
            ..Params::default()
        };
        let mut sidechains = SidechainTable::default();
        sidechains.insert(Sidechain::new(0, &proposal(100)));
        let mut registry = ProposalRegistry::default();
        let id = proposal(0).id();
        registry.submit(proposal(0), &sidechains, &params, &mut vec![]);
        let renewed: BTreeSet<_> = [id].into_iter().collect();

        let report = registry.advance(&renewed, &none(), &mut sidechains, &params, &mut vec![]);
        assert_eq!(report.rejected, vec![(id, Rejection::NoFreeSlot)]);
        assert!(registry.is_empty());
        assert_eq!(sidechains.len(), 1);
    }

    #[test]
    fn fresh_statuses_are_not_aged() {
        let params = Params::default();
        let mut sidechains = SidechainTable::default();
        let mut registry = ProposalRegistry::default();
        let id = proposal(0).id();
        registry.submit(proposal(0), &sidechains, &params, &mut vec![]);
        let fresh: BTreeSet<_> = [id].into_iter().collect();
        registry.advance(&none(), &fresh, &mut sidechains, &params, &mut vec![]);
        assert_eq!(registry.get(&id).unwrap().age, 0);
    }

    #[test]
    fn counters_follow_random_renewals() {
        let params = Params {
            activation_threshold: 1_000,
            ..Params::default()
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut sidechains = SidechainTable::default();
            let mut registry = ProposalRegistry::default();
            let id = proposal(0).id();
            registry.submit(proposal(0), &sidechains, &params, &mut vec![]);
            let (mut age, mut fail, mut renewals) = (0u16, 0u16, 0u16);
            loop {
                let renew = rng.gen_range(0, 10) < 8;
                let renewed: BTreeSet<_> = if renew {
                    [id].into_iter().collect()
                } else {
                    BTreeSet::new()
                };
                registry.advance(&renewed, &none(), &mut sidechains, &params, &mut vec![]);
                age += 1;
                fail = if renew { 0 } else { fail + 1 };
                renewals += u16::from(renew);
                let discarded = fail > 32 || age > 64;
                match registry.get(&id) {
                    Some(status) => {
                        assert!(!discarded);
                        assert_eq!(
                            (status.age, status.fail, status.renewals),
                            (age, fail, renewals)
                        );
                    }
                    None => {
                        assert!(discarded);
                        break;
                    }
                }
            }
        }
    }
}
