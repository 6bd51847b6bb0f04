use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Digest;

const SHA256_LENGTH: usize = 32;
pub type Hash = [u8; SHA256_LENGTH];

/// Slot of an active sidechain.
pub type SidechainNumber = u8;

/// Upper bound on a record decoded from untrusted bytes.
const MAX_RECORD_SIZE: u64 = 1 << 22;

// Fixed-width little-endian integers, fields in declaration order. Changing
// any of this changes every hash in the SCDB.
fn canonical_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Canonical byte encoding of a record.
pub fn encode<T: Serialize + ?Sized>(record: &T) -> Vec<u8> {
    canonical_options()
        .serialize(record)
        .expect("failed to serialize a record into its canonical encoding")
}

/// Inverse of [`encode`]. Fails on truncated input, trailing bytes and
/// records larger than the decode limit.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    canonical_options()
        .with_limit(MAX_RECORD_SIZE)
        .deserialize(bytes)
}

pub fn hash<T: Serialize + ?Sized>(data: &T) -> Hash {
    let mut hasher = sha2::Sha256::new();
    hasher.update(encode(data));
    hasher.finalize().into()
}

/// Content hash of a sidechain proposal, also the key of its activation status.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ProposalId(Hash);

impl From<Hash> for ProposalId {
    fn from(other: Hash) -> Self {
        Self(other)
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Identifier of a withdrawal bundle (WT^).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct WtPrimeHash(Hash);

impl From<Hash> for WtPrimeHash {
    fn from(other: Hash) -> Self {
        Self(other)
    }
}

impl From<WtPrimeHash> for Hash {
    fn from(other: WtPrimeHash) -> Self {
        other.0
    }
}

impl std::fmt::Display for WtPrimeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for WtPrimeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Snapshot hash of the whole SCDB, committed to by the following block.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScdbHash(Hash);

impl From<Hash> for ScdbHash {
    fn from(other: Hash) -> Self {
        Self(other)
    }
}

impl std::fmt::Display for ScdbHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for ScdbHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
