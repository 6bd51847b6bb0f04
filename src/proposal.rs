use crate::params::{SIDECHAIN_VERSION_CURRENT, SIDECHAIN_VERSION_MAX};
use crate::types::{self, ProposalId};
use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Script};
use serde::{Deserialize, Serialize};

/// Bytes following OP_RETURN in a sidechain proposal commitment.
const PROPOSAL_HEADER: [u8; 4] = [0xD5, 0xE0, 0xC4, 0xAF];

/// A candidate sidechain, as committed to in a coinbase output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proposal {
    pub version: i32,
    pub title: String,
    pub description: String,
    pub key_id: String,
    /// Hex of the deposit script template.
    pub script_hex: String,
    pub private_key: String,
    pub hash_id1: [u8; 32],
    pub hash_id2: [u8; 20],
}

impl Default for Proposal {
    fn default() -> Self {
        Self {
            version: SIDECHAIN_VERSION_CURRENT,
            title: String::new(),
            description: String::new(),
            key_id: String::new(),
            script_hex: String::new(),
            private_key: String::new(),
            hash_id1: [0; 32],
            hash_id2: [0; 20],
        }
    }
}

impl Proposal {
    pub fn id(&self) -> ProposalId {
        types::hash(self).into()
    }

    pub fn bytes(&self) -> Vec<u8> {
        types::encode(self)
    }

    /// `OP_RETURN || header || canonical proposal bytes`.
    pub fn script(&self) -> Script {
        let mut bytes = Builder::new()
            .push_opcode(opcodes::all::OP_RETURN)
            .into_script()
            .to_bytes();
        bytes.extend_from_slice(&PROPOSAL_HEADER);
        bytes.extend(self.bytes());
        Script::from(bytes)
    }

    pub fn from_script(script: &Script) -> Result<Self, DecodeError> {
        if !script.is_op_return() {
            return Err(DecodeError::NotOpReturn);
        }
        let payload = script.as_bytes()[1..]
            .strip_prefix(&PROPOSAL_HEADER[..])
            .ok_or(DecodeError::MissingHeader)?;
        let proposal: Proposal = types::decode(payload)?;
        if !(0..=SIDECHAIN_VERSION_MAX).contains(&proposal.version) {
            return Err(DecodeError::UnsupportedVersion(proposal.version));
        }
        hex::decode(&proposal.script_hex)?;
        Ok(proposal)
    }
}

impl std::fmt::Display for Proposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "proposal {} (version {}, title {:?}, key id {}, hash id 1 {}, hash id 2 {})",
            self.id(),
            self.version,
            self.title,
            self.key_id,
            hex::encode(self.hash_id1),
            hex::encode(self.hash_id2),
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("script is not an OP_RETURN output")]
    NotOpReturn,
    #[error("script does not carry the sidechain proposal header")]
    MissingHeader,
    #[error("malformed proposal encoding")]
    Bincode(#[from] bincode::Error),
    #[error("unsupported sidechain version {0}")]
    UnsupportedVersion(i32),
    #[error("script template is not valid hex")]
    Hex(#[from] hex::FromHexError),
}

/// A proposal under consideration for activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationStatus {
    /// Blocks tracked since the proposal was first seen.
    pub age: u16,
    /// Consecutive blocks without a renewing commitment.
    pub fail: u16,
    /// Blocks after the first one that renewed the commitment.
    pub renewals: u16,
    pub proposal: Proposal,
}

impl ActivationStatus {
    pub fn new(proposal: Proposal) -> Self {
        Self {
            age: 0,
            fail: 0,
            renewals: 0,
            proposal,
        }
    }

    /// Registry key. Derived from the proposal alone, so counter updates
    /// never move a status.
    pub fn id(&self) -> ProposalId {
        self.proposal.id()
    }

    /// Confirming weight compared against the activation threshold: the
    /// number of renewals, however they are spread over the age.
    pub fn weight(&self) -> u16 {
        self.renewals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal() -> Proposal {
        Proposal {
            title: "Testchain".into(),
            description: "a test sidechain".into(),
            key_id: "80dca759b4ff2c9e9b65ec790703ad09fba844cd".into(),
            script_hex: "76a91480dca759b4ff2c9e9b65ec790703ad09fba844cd88ac".into(),
            private_key: "5Jf2vbdzdCccKApCrjmwL5EFc4f1cUm5Ah4L4LGimEuFyqYpa9r".into(),
            hash_id1: [1; 32],
            hash_id2: [2; 20],
            ..Proposal::default()
        }
    }

    #[test]
    fn script_round_trip() -> anyhow::Result<()> {
        let proposal = proposal();
        let script = proposal.script();
        assert!(script.is_op_return());
        assert_eq!(&script.as_bytes()[1..5], &PROPOSAL_HEADER);
        assert_eq!(Proposal::from_script(&script)?, proposal);
        Ok(())
    }

    #[test]
    fn id_changes_with_every_field() {
        let base = proposal();
        let variants = vec![
            Proposal {
                title: "Other".into(),
                ..base.clone()
            },
            Proposal {
                description: String::new(),
                ..base.clone()
            },
            Proposal {
                key_id: String::new(),
                ..base.clone()
            },
            Proposal {
                script_hex: "51".into(),
                ..base.clone()
            },
            Proposal {
                private_key: String::new(),
                ..base.clone()
            },
            Proposal {
                hash_id1: [3; 32],
                ..base.clone()
            },
            Proposal {
                hash_id2: [3; 20],
                ..base.clone()
            },
        ];
        assert_eq!(base.id(), proposal().id());
        for variant in variants {
            assert_ne!(variant.id(), base.id());
        }
    }

    #[test]
    fn malformed_scripts_are_rejected() {
        let good = proposal().script().to_bytes();

        let not_op_return = Script::from(good[1..].to_vec());
        assert!(matches!(
            Proposal::from_script(&not_op_return),
            Err(DecodeError::NotOpReturn)
        ));

        let mut bad_header = good.clone();
        bad_header[2] = 0;
        assert!(matches!(
            Proposal::from_script(&Script::from(bad_header)),
            Err(DecodeError::MissingHeader)
        ));

        let truncated = Script::from(good[..good.len() - 1].to_vec());
        assert!(matches!(
            Proposal::from_script(&truncated),
            Err(DecodeError::Bincode(_))
        ));

        let mut trailing = good;
        trailing.push(0);
        assert!(Proposal::from_script(&Script::from(trailing)).is_err());

        assert!(Proposal::from_script(&Script::new()).is_err());
    }

    #[test]
    fn future_versions_and_bad_templates_are_rejected() {
        let future = Proposal {
            version: SIDECHAIN_VERSION_MAX + 1,
            ..proposal()
        };
        assert!(matches!(
            Proposal::from_script(&future.script()),
            Err(DecodeError::UnsupportedVersion(1))
        ));

        let bad_hex = Proposal {
            script_hex: "zz".into(),
            ..proposal()
        };
        assert!(matches!(
            Proposal::from_script(&bad_hex.script()),
            Err(DecodeError::Hex(_))
        ));
    }

    #[test]
    fn status_key_ignores_counters() {
        let mut status = ActivationStatus::new(proposal());
        let id = status.id();
        status.age = 10;
        status.fail = 3;
        status.renewals = 5;
        assert_eq!(status.id(), id);
        assert_eq!(status.weight(), 5);
    }
}
