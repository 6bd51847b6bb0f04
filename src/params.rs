use crate::vote::Vote;
use serde::{Deserialize, Serialize};

// These are the temporary values to speed things up during testing. The
// release values are a verification period of 26298 blocks and a minimum
// workscore of 13140.
pub const SIDECHAIN_VERIFICATION_PERIOD: u16 = 32;
pub const SIDECHAIN_MIN_WORKSCORE: u16 = 16;

/// Deposit fee in satoshis (0.00001 BTC).
pub const SIDECHAIN_DEPOSIT_FEE: u64 = 1_000;

/// Max number of failures (blocks without commits) for a sidechain to activate.
pub const SIDECHAIN_ACTIVATION_MAX_FAILURES: u16 = 32;
/// The amount of time a sidechain has to activate.
pub const SIDECHAIN_ACTIVATION_MAX_AGE: u16 = 64;
/// The number of sidechains which may be signaled for activation at once.
pub const SIDECHAIN_ACTIVATION_MAX_SIGNALS: usize = 32;
/// The number of sidechains which may be active at once.
pub const SIDECHAIN_ACTIVATION_MAX_ACTIVE: u16 = 256;

pub const SIDECHAIN_VERSION_CURRENT: i32 = 0;
pub const SIDECHAIN_VERSION_MAX: i32 = 0;

/// Consensus parameters of the SCDB. Every node on a network must use the
/// same values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Blocks a WT^ has to collect its workscore.
    pub verification_period: u16,
    pub min_workscore: u16,
    pub deposit_fee: u64,
    pub activation_max_failures: u16,
    pub activation_max_age: u16,
    pub activation_max_signals: usize,
    pub activation_max_active: u16,
    /// A pending proposal activates once `age - fail` reaches this weight.
    pub activation_threshold: u16,
    /// Vote applied to a tracked WT^ when a block carries no custom vote for it.
    pub default_vote: Vote,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            verification_period: SIDECHAIN_VERIFICATION_PERIOD,
            min_workscore: SIDECHAIN_MIN_WORKSCORE,
            deposit_fee: SIDECHAIN_DEPOSIT_FEE,
            activation_max_failures: SIDECHAIN_ACTIVATION_MAX_FAILURES,
            activation_max_age: SIDECHAIN_ACTIVATION_MAX_AGE,
            activation_max_signals: SIDECHAIN_ACTIVATION_MAX_SIGNALS,
            activation_max_active: SIDECHAIN_ACTIVATION_MAX_ACTIVE,
            activation_threshold: SIDECHAIN_ACTIVATION_MAX_AGE,
            default_vote: Vote::Abstain,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), Error> {
        if self.verification_period == 0 {
            return Err(Error::ZeroVerificationPeriod);
        }
        if self.min_workscore == 0 || self.min_workscore >= self.verification_period {
            return Err(Error::UnreachableWorkscore {
                min_workscore: self.min_workscore,
                verification_period: self.verification_period,
            });
        }
        if self.activation_max_active == 0
            || self.activation_max_active > SIDECHAIN_ACTIVATION_MAX_ACTIVE
        {
            return Err(Error::MaxActive(self.activation_max_active));
        }
        if self.activation_threshold == 0 {
            return Err(Error::ZeroActivationThreshold);
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("verification period must be at least one block")]
    ZeroVerificationPeriod,
    #[error("min workscore {min_workscore} cannot be reached within {verification_period} blocks")]
    UnreachableWorkscore {
        min_workscore: u16,
        verification_period: u16,
    },
    #[error("max active sidechains must be in 1..=256, got {0}")]
    MaxActive(u16),
    #[error("activation threshold must be at least one block")]
    ZeroActivationThreshold,
}
