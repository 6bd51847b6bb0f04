use crate::proposal::Proposal;
use crate::types::{self, Hash, SidechainNumber};
use bitcoin::Script;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An active sidechain occupying a slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sidechain {
    pub version: i32,
    pub number: SidechainNumber,
    pub key_id: String,
    pub private_key: String,
    pub script_hex: String,
    pub title: String,
    pub description: String,
    pub hash_id1: [u8; 32],
    pub hash_id2: [u8; 20],
}

impl Sidechain {
    pub fn new(number: SidechainNumber, proposal: &Proposal) -> Self {
        Self {
            version: proposal.version,
            number,
            key_id: proposal.key_id.clone(),
            private_key: proposal.private_key.clone(),
            script_hex: proposal.script_hex.clone(),
            title: proposal.title.clone(),
            description: proposal.description.clone(),
            hash_id1: proposal.hash_id1,
            hash_id2: proposal.hash_id2,
        }
    }

    pub fn hash(&self) -> Hash {
        types::hash(self)
    }

    /// Whether this sidechain was activated from `proposal`.
    pub fn matches(&self, proposal: &Proposal) -> bool {
        self.version == proposal.version
            && self.key_id == proposal.key_id
            && self.private_key == proposal.private_key
            && self.script_hex == proposal.script_hex
            && self.title == proposal.title
            && self.description == proposal.description
            && self.hash_id1 == proposal.hash_id1
            && self.hash_id2 == proposal.hash_id2
    }

    /// Script every deposit output of this sidechain must pay to.
    pub fn deposit_script(&self) -> Option<Script> {
        hex::decode(&self.script_hex).ok().map(Script::from)
    }
}

impl std::fmt::Display for Sidechain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sidechain {} {:?} (version {}, key id {}, script {})",
            self.number, self.title, self.version, self.key_id, self.script_hex
        )
    }
}

/// Active sidechains by slot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidechainTable {
    sidechains: BTreeMap<SidechainNumber, Sidechain>,
}

impl SidechainTable {
    pub fn get(&self, number: SidechainNumber) -> Option<&Sidechain> {
        self.sidechains.get(&number)
    }

    pub fn is_active(&self, number: SidechainNumber) -> bool {
        self.sidechains.contains_key(&number)
    }

    pub fn contains_proposal(&self, proposal: &Proposal) -> bool {
        self.sidechains.values().any(|s| s.matches(proposal))
    }

    /// Lowest unused slot below `max_active`.
    pub fn free_slot(&self, max_active: u16) -> Option<SidechainNumber> {
        (0..max_active)
            .filter_map(|slot| SidechainNumber::try_from(slot).ok())
            .find(|slot| !self.sidechains.contains_key(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sidechain> {
        self.sidechains.values()
    }

    pub fn len(&self) -> usize {
        self.sidechains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sidechains.is_empty()
    }

    pub(crate) fn insert(&mut self, sidechain: Sidechain) {
        self.sidechains.insert(sidechain.number, sidechain);
    }

    pub(crate) fn remove(&mut self, number: SidechainNumber) -> Option<Sidechain> {
        self.sidechains.remove(&number)
    }
}
