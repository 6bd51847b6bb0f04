use crate::types::{SidechainNumber, WtPrimeHash};
use serde::{Deserialize, Serialize};

pub const SCDB_UPVOTE: char = 'u';
pub const SCDB_DOWNVOTE: char = 'd';
pub const SCDB_ABSTAIN: char = 'a';

/// A miner's vote on a WT^. Encoded as its single-character tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "char", try_from = "char")]
pub enum Vote {
    Upvote,
    Downvote,
    Abstain,
}

impl From<Vote> for char {
    fn from(vote: Vote) -> Self {
        match vote {
            Vote::Upvote => SCDB_UPVOTE,
            Vote::Downvote => SCDB_DOWNVOTE,
            Vote::Abstain => SCDB_ABSTAIN,
        }
    }
}

impl TryFrom<char> for Vote {
    type Error = InvalidVoteTag;

    fn try_from(tag: char) -> Result<Self, Self::Error> {
        match tag {
            SCDB_UPVOTE => Ok(Vote::Upvote),
            SCDB_DOWNVOTE => Ok(Vote::Downvote),
            SCDB_ABSTAIN => Ok(Vote::Abstain),
            other => Err(InvalidVoteTag(other)),
        }
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", char::from(*self))
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid vote tag {0:?}")]
pub struct InvalidVoteTag(pub char);

/// A vote set for one particular WT^, overriding the default vote for the
/// block it is carried in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomVote {
    pub vote: Vote,
    pub sidechain: SidechainNumber,
    pub wt_prime: WtPrimeHash,
}
